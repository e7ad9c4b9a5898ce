//! HTTP handlers. §6 plus the ambient `/health`, `/ready`, `/metrics`,
//! `/ws` surface (§4.N).

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::boundary::auth::{AuthUser, VenueOwner};
use crate::boundary::validation;
use crate::channels::realtime::run_connection;
use crate::errors::{QueueError, QueueResult};
use crate::models::{CheckInLog, GeoPoint, QueueEntry, QueueStatus, UserReputation};
use crate::AppState;

#[derive(Deserialize)]
pub struct EnrolRequest {
    pub venue_id: String,
    pub service_ids: Vec<String>,
    pub total_price: f64,
    #[serde(default)]
    pub applied_offer_ids: Vec<String>,
}

pub async fn enrol(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<EnrolRequest>,
) -> QueueResult<Json<QueueEntry>> {
    state.rate_limit_api.check(&auth.user_id)?;
    validation::require_non_empty_id("venueId", &body.venue_id)?;
    let service_ids = body.service_ids.into_iter().map(|s| validation::strip_html_tags(&s)).collect();

    let entry = state
        .service
        .enrol(&auth.user_id, &body.venue_id, service_ids, body.total_price, body.applied_offer_ids)?;
    state.metrics.inc_enrolled();
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct NotifyRequest {
    pub window_minutes: u32,
}

pub async fn notify(
    State(state): State<AppState>,
    _owner: VenueOwner,
    Path(queue_id): Path<String>,
    Json(body): Json<NotifyRequest>,
) -> QueueResult<Json<QueueEntry>> {
    state.rate_limit_notify.check(&queue_id)?;
    let entry = state.service.notify(&queue_id, body.window_minutes).await?;
    state.metrics.inc_notified();
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct CheckInRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

pub async fn check_in(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(queue_id): Path<String>,
    Json(body): Json<CheckInRequest>,
) -> QueueResult<Json<QueueEntry>> {
    state.rate_limit_checkin.check(&format!("{}:{}", auth.user_id, queue_id))?;

    let existing = state.store.get_entry(&queue_id)?;
    if existing.user_id != auth.user_id {
        return Err(QueueError::NotQueueOwner);
    }

    let location = match (body.latitude, body.longitude) {
        (Some(lat), Some(lon)) => {
            validation::validate_latitude(lat)?;
            validation::validate_longitude(lon)?;
            Some(GeoPoint { latitude: lat, longitude: lon, accuracy: body.accuracy })
        }
        _ => None,
    };

    let entry = match state.service.check_in(&queue_id, location) {
        Ok(entry) => {
            state.metrics.inc_checked_in();
            if entry.status == QueueStatus::PendingVerification {
                state.metrics.inc_verification_pending();
            }
            entry
        }
        Err(e) => {
            state.metrics.inc_check_in_rejected();
            return Err(e);
        }
    };
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub approve: bool,
}

pub async fn verify_arrival(
    State(state): State<AppState>,
    owner: VenueOwner,
    Path(queue_id): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> QueueResult<Json<QueueEntry>> {
    let entry = state.service.verify_arrival(&queue_id, &owner.0.user_id, body.approve).await?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: QueueStatus,
}

/// PUT /queues/{id}/status — §4.K: admin for `{notified, in-progress,
/// completed, no-show}`, the entry's own customer for `{pending_verification}`.
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(queue_id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> QueueResult<Json<QueueEntry>> {
    let actor = match body.status {
        QueueStatus::PendingVerification => {
            let entry = state.store.get_entry(&queue_id)?;
            if entry.user_id != auth.user_id {
                return Err(QueueError::NotQueueOwner);
            }
            format!("user:{}", auth.user_id)
        }
        _ => {
            if auth.role != crate::models::Role::VenueOwner {
                return Err(QueueError::Forbidden);
            }
            format!("admin:{}", auth.user_id)
        }
    };

    let entry = state.service.update_status(&queue_id, body.status, &actor).await?;
    match entry.status {
        QueueStatus::Completed => state.metrics.inc_completed(),
        QueueStatus::NoShow => state.metrics.inc_no_shows(),
        _ => {}
    }
    Ok(Json(entry))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(queue_id): Path<String>,
) -> QueueResult<Json<QueueEntry>> {
    let entry = state.store.get_entry(&queue_id)?;
    if entry.user_id != auth.user_id {
        return Err(QueueError::NotQueueOwner);
    }
    let actor = format!("user:{}", auth.user_id);
    let entry = state.service.cancel(&queue_id, &actor)?;
    state.metrics.inc_cancelled();
    Ok(Json(entry))
}

pub async fn list_venue_queue(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
) -> QueueResult<Json<Vec<QueueEntry>>> {
    let entries = state.service.recompute_positions(&venue_id)?;
    Ok(Json(entries))
}

/// GET /venues/{id}/pending-verifications — entries awaiting operator
/// review, suspicious ones surfaced first, then oldest first within each
/// group so a busy front desk clears the backlog in a sane order.
pub async fn pending_verifications(
    State(state): State<AppState>,
    _owner: VenueOwner,
    Path(venue_id): Path<String>,
) -> Json<Vec<QueueEntry>> {
    let mut entries: Vec<QueueEntry> = state
        .store
        .entries_for_venue(&venue_id)
        .into_iter()
        .filter(|e| e.status == QueueStatus::PendingVerification)
        .collect();

    entries.sort_by_key(|e| {
        let is_suspicious = state
            .audit
            .checkins_for_queue(&e.id)
            .last()
            .map(|log| log.suspicious)
            .unwrap_or(false);
        (!is_suspicious, e.created_at_ms)
    });
    Json(entries)
}

pub async fn reputation(
    State(state): State<AppState>,
    _owner: VenueOwner,
    Path(user_id): Path<String>,
) -> Json<UserReputation> {
    Json(state.reputation.get(&user_id))
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn checkin_history(
    State(state): State<AppState>,
    _owner: VenueOwner,
    Path(user_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> Json<Vec<CheckInLog>> {
    let mut logs = state.audit.checkins_for_user(&user_id);
    logs.sort_by_key(|l| std::cmp::Reverse(l.timestamp_ms));
    let offset = pagination.offset.unwrap_or(0);
    let limit = pagination.limit.unwrap_or(50).min(200);
    Json(logs.into_iter().skip(offset).take(limit).collect())
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let _ = &state.store;
    Json(HealthResponse { status: "ready" })
}

pub async fn metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsResponse> {
    Json(state.metrics.snapshot())
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(state.bus.clone(), socket))
}
