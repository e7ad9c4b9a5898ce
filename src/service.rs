//! Queue service orchestrator. §4.K.
//!
//! Wires the state machine, position engine, verification engine,
//! reputation store, notifier and audit log into the seven operations the
//! HTTP boundary calls: `enrol`, `notify`, `check_in`, `verify_arrival`,
//! `update_status`, `recompute_positions`, and `cancel`.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditLog, TransitionRecord};
use crate::channels::realtime::SharedRealtimeBus;
use crate::clock::SharedClock;
use crate::errors::{QueueError, QueueResult};
use crate::models::{
    CheckInLog, GeoPoint, QueueEntry, QueueId, QueueStatus, ReputationAction, UserId, VenueId,
    VerificationMethod,
};
use crate::notifier::{NotificationDispatcher, TemplateData};
use crate::position;
use crate::reputation::SharedReputationStore;
use crate::state_machine::check_transition;
use crate::store::SharedStore;
use crate::verification::VerificationEngine;

const VALID_WINDOW_MINUTES: [u32; 4] = [5, 10, 15, 20];

pub struct QueueService {
    store: SharedStore,
    reputation: SharedReputationStore,
    audit: Arc<AuditLog>,
    verification: VerificationEngine,
    notifier: NotificationDispatcher,
    bus: SharedRealtimeBus,
    clock: SharedClock,
}

impl QueueService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        reputation: SharedReputationStore,
        audit: Arc<AuditLog>,
        verification: VerificationEngine,
        notifier: NotificationDispatcher,
        bus: SharedRealtimeBus,
        clock: SharedClock,
    ) -> Self {
        Self { store, reputation, audit, verification, notifier, bus, clock }
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn transition(&self, entry: &QueueEntry, to: QueueStatus, actor: &str, reason: Option<String>) -> QueueResult<()> {
        check_transition(entry.status, to)?;
        self.audit.record_transition(TransitionRecord {
            queue_id: entry.id.clone(),
            old_status: entry.status,
            new_status: to,
            actor: actor.to_string(),
            reason,
            timestamp_ms: self.now(),
        });
        Ok(())
    }

    fn template_for(&self, venue_id: &VenueId, entry: &QueueEntry) -> QueueResult<TemplateData> {
        let venue = self.store.get_venue(venue_id)?;
        Ok(TemplateData {
            venue_name: venue.name,
            venue_address: venue.address,
            estimated_minutes: entry.estimated_wait_minutes,
            services: entry.service_ids.clone(),
            position: entry.position,
            extra: serde_json::json!({ "queueId": entry.id }),
        })
    }

    /// At most one active queue entry per (user, venue) (§3 invariant).
    pub fn enrol(
        &self,
        user_id: &UserId,
        venue_id: &VenueId,
        service_ids: Vec<String>,
        total_price: f64,
        applied_offer_ids: Vec<String>,
    ) -> QueueResult<QueueEntry> {
        self.store.get_venue(venue_id)?;
        if self.reputation.is_banned(user_id) {
            return Err(QueueError::UserBanned);
        }
        if self.store.active_entry_for_user_venue(user_id, venue_id).is_some() {
            return Err(QueueError::AlreadyInQueue);
        }

        let entry = QueueEntry::new(
            Uuid::new_v4().to_string(),
            venue_id.clone(),
            user_id.clone(),
            service_ids,
            total_price,
            applied_offer_ids,
            self.now(),
        );
        self.store.create_entry(entry.clone())?;
        position::recompute_and_broadcast(&self.store, &self.bus, &self.clock, venue_id)?;
        self.store.get_entry(&entry.id)
    }

    pub async fn notify(&self, queue_id: &QueueId, window_minutes: u32) -> QueueResult<QueueEntry> {
        if !VALID_WINDOW_MINUTES.contains(&window_minutes) {
            return Err(QueueError::InvalidInput("windowMinutes must be one of 5, 10, 15, 20".to_string()));
        }
        let mut entry = self.store.get_entry(queue_id)?;
        self.transition(&entry, QueueStatus::Notified, "system:notify", None)?;

        entry.status = QueueStatus::Notified;
        entry.notified_at_ms = Some(self.now());
        entry.notification_window_minutes = Some(window_minutes);
        self.store.update_entry(entry.clone())?;

        let data = self.template_for(&entry.venue_id, &entry)?;
        self.notifier
            .notify(&entry.user_id, &entry.id, crate::models::NotificationKind::QueueNotification, data)
            .await;

        self.store.get_entry(queue_id)
    }

    /// Attempts check-in with a device location, running the verification
    /// engine and transitioning into `nearby` (auto-approved or admin
    /// override later), `pending_verification` (needs review), or leaving
    /// the entry in `notified` on outright rejection.
    pub fn check_in(&self, queue_id: &QueueId, user_location: Option<GeoPoint>) -> QueueResult<QueueEntry> {
        let mut entry = self.store.get_entry(queue_id)?;
        if entry.status != QueueStatus::Notified {
            return Err(QueueError::InvalidStatusTransition {
                valid_statuses: vec!["notified".to_string()],
            });
        }

        let venue = self.store.get_venue(&entry.venue_id)?;
        let now = self.now();
        let decision = self.verification.evaluate(
            &entry.user_id,
            &entry.venue_id,
            user_location.clone(),
            venue.location(),
            entry.notified_at_ms,
            now,
            now,
        );

        entry.check_in_attempted_at_ms = Some(now);
        entry.check_in_location = user_location.clone();
        entry.check_in_distance_meters = decision.distance_meters;

        let log = CheckInLog {
            id: Uuid::new_v4().to_string(),
            queue_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            venue_id: entry.venue_id.clone(),
            timestamp_ms: now,
            user_location,
            venue_location: venue.location(),
            distance_meters: decision.distance_meters,
            method: decision.verified.then_some(VerificationMethod::GpsAuto),
            auto_approved: decision.auto_approved,
            requires_confirmation: decision.requires_review,
            success: decision.verified,
            reason: decision.reason.clone(),
            suspicious: decision.suspicious(),
            suspicious_reasons: decision.suspicious_reasons.clone(),
            time_since_notification_ms: entry.notified_at_ms.map(|n| now.saturating_sub(n)),
        };
        self.audit.record_checkin(log);

        if !decision.verified {
            self.store.update_entry(entry.clone())?;
            return Err(QueueError::LocationTooFar);
        }

        let to = if decision.auto_approved { QueueStatus::Nearby } else { QueueStatus::PendingVerification };
        self.transition(&entry, to, "system:check_in", Some(decision.reason.clone()))?;
        entry.status = to;
        if decision.auto_approved {
            entry.verified_at_ms = Some(now);
            entry.verification_method = Some(VerificationMethod::GpsAuto);
            self.reputation.apply(&entry.user_id, ReputationAction::SuccessfulCheckin);
        }
        self.store.update_entry(entry.clone())?;

        // User lookup is best-effort: an unknown user shouldn't block the
        // check-in path, it just yields an operator frame with a blank name.
        let user = self.store.get_user(&entry.user_id).ok();
        let frame = crate::channels::realtime::customer_arrived_frame(
            now,
            &entry.venue_id,
            &entry.id,
            &entry.user_id,
            user.as_ref().map(|u| u.name.as_str()).unwrap_or(""),
            user.as_ref().and_then(|u| u.phone.as_deref()),
            decision.verified,
            decision.distance_meters,
            decision.requires_review,
        );
        self.bus.broadcast_to_venue_owner(&venue.owner_user_id, frame);

        self.store.get_entry(queue_id)
    }

    /// Operator confirms or rejects a `pending_verification` entry:
    /// confirmed moves to `nearby`, rejected reverts to `notified` so the
    /// customer can attempt check-in again (§4.H, §4.K). Per design
    /// decision: rejection costs reputation, confirmation does not.
    pub async fn verify_arrival(&self, queue_id: &QueueId, admin_id: &UserId, approve: bool) -> QueueResult<QueueEntry> {
        let mut entry = self.store.get_entry(queue_id)?;
        if entry.status != QueueStatus::PendingVerification {
            return Err(QueueError::InvalidStatusTransition {
                valid_statuses: vec!["pending_verification".to_string()],
            });
        }

        let now = self.now();
        if approve {
            self.transition(&entry, QueueStatus::Nearby, &format!("admin:{admin_id}"), None)?;
            entry.status = QueueStatus::Nearby;
            entry.verified_at_ms = Some(now);
            entry.verification_method = Some(VerificationMethod::AdminOverride);
            entry.verified_by_admin_id = Some(admin_id.clone());
            self.store.update_entry(entry.clone())?;

            let data = self.template_for(&entry.venue_id, &entry)?;
            self.notifier
                .notify(&entry.user_id, &entry.id, crate::models::NotificationKind::ArrivalVerified, data)
                .await;
        } else {
            self.transition(&entry, QueueStatus::Notified, &format!("admin:{admin_id}"), Some("rejected by operator".to_string()))?;
            entry.status = QueueStatus::Notified;
            self.reputation.apply(&entry.user_id, ReputationAction::AdminOverride);
            self.store.update_entry(entry.clone())?;
        }

        self.store.get_entry(queue_id)
    }

    /// Drives `nearby -> in-progress -> completed`, or an operator-forced
    /// `no-show` from any non-terminal status.
    pub async fn update_status(&self, queue_id: &QueueId, to: QueueStatus, actor: &str) -> QueueResult<QueueEntry> {
        self.update_status_with_reason(queue_id, to, actor, None).await
    }

    /// Same side-effect path as [`Self::update_status`] (transition, reputation,
    /// notification, position recompute) but lets the caller supply the
    /// no-show reason instead of the operator-default text — used by the
    /// no-show sweeper (§4.J) to record why the system, not an operator,
    /// made the call.
    pub(crate) async fn update_status_with_reason(
        &self,
        queue_id: &QueueId,
        to: QueueStatus,
        actor: &str,
        no_show_reason: Option<String>,
    ) -> QueueResult<QueueEntry> {
        let mut entry = self.store.get_entry(queue_id)?;
        self.transition(&entry, to, actor, no_show_reason.clone())?;

        let now = self.now();
        entry.status = to;
        let kind = match to {
            QueueStatus::InProgress => {
                entry.service_started_at_ms = Some(now);
                Some(crate::models::NotificationKind::ServiceStarting)
            }
            QueueStatus::Completed => {
                entry.service_completed_at_ms = Some(now);
                self.reputation.apply(&entry.user_id, ReputationAction::CompletedService);
                Some(crate::models::NotificationKind::ServiceCompleted)
            }
            QueueStatus::NoShow => {
                entry.no_show_marked_at_ms = Some(now);
                entry.no_show_reason = Some(no_show_reason.unwrap_or_else(|| "marked no-show by operator".to_string()));
                self.reputation.apply(&entry.user_id, ReputationAction::NoShow);
                Some(crate::models::NotificationKind::NoShow)
            }
            _ => None,
        };
        self.store.update_entry(entry.clone())?;

        if let Some(kind) = kind {
            let data = self.template_for(&entry.venue_id, &entry)?;
            self.notifier.notify(&entry.user_id, &entry.id, kind, data).await;
        }

        if to.is_terminal() || to == QueueStatus::InProgress {
            position::recompute_and_broadcast(&self.store, &self.bus, &self.clock, &entry.venue_id)?;
        }

        self.store.get_entry(queue_id)
    }

    pub fn recompute_positions(&self, venue_id: &VenueId) -> QueueResult<Vec<QueueEntry>> {
        position::recompute_and_broadcast(&self.store, &self.bus, &self.clock, venue_id)
    }

    /// Customer-initiated cancellation. Shaped like a no-show for downstream
    /// reporting but carries a distinct reason and no reputation penalty —
    /// the customer chose to leave, they didn't fail to show up.
    pub fn cancel(&self, queue_id: &QueueId, actor: &str) -> QueueResult<QueueEntry> {
        let mut entry = self.store.get_entry(queue_id)?;
        self.transition(&entry, QueueStatus::NoShow, actor, Some("cancelled_by_customer".to_string()))?;

        entry.status = QueueStatus::NoShow;
        entry.no_show_marked_at_ms = Some(self.now());
        entry.no_show_reason = Some("cancelled_by_customer".to_string());
        self.store.update_entry(entry.clone())?;
        position::recompute_and_broadcast(&self.store, &self.bus, &self.clock, &entry.venue_id)?;
        self.store.get_entry(queue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::external_msg::NullExternalMessageSender;
    use crate::channels::realtime::RealtimeBus;
    use crate::channels::web_push::NullWebPushSender;
    use crate::channels::ExternalMessageSender;
    use crate::clock::ManualClock;
    use crate::models::{GeoPoint, Venue};
    use crate::reputation::ReputationStore;
    use crate::resilience::OfflineBuffer;
    use crate::store::InMemoryStore;

    fn venue() -> Venue {
        Venue {
            id: "v1".into(),
            owner_user_id: "owner1".into(),
            latitude: 12.9716,
            longitude: 77.5946,
            name: "Test Salon".into(),
            address: "1 Main St".into(),
        }
    }

    fn service() -> (QueueService, SharedStore, ManualClock, Arc<RealtimeBus>) {
        let manual = ManualClock::new(0);
        let clock: SharedClock = Arc::new(manual.clone());
        let store: SharedStore = Arc::new(InMemoryStore::new());
        store.put_venue(venue());
        let reputation = Arc::new(ReputationStore::new(clock.clone()));
        let audit = AuditLog::spawn(std::env::temp_dir().join(format!("service-test-{}", Uuid::new_v4())));
        let verification = VerificationEngine::new(reputation.clone(), audit.clone(), store.clone());
        let bus = Arc::new(RealtimeBus::new(clock.clone()));
        let offline_buffer = Arc::new(OfflineBuffer::new(clock.clone()));
        bus.set_offline_buffer(offline_buffer.clone());
        let external: Arc<dyn ExternalMessageSender> = Arc::new(NullExternalMessageSender::default());
        let push = Arc::new(NullWebPushSender::default());
        let notifier = NotificationDispatcher::new(bus.clone(), external, push, store.clone(), audit.clone(), clock.clone(), offline_buffer);
        let service = QueueService::new(store.clone(), reputation, audit, verification, notifier, bus.clone(), clock);
        (service, store, manual, bus)
    }

    #[test]
    fn enrol_rejects_second_active_entry_at_same_venue() {
        let (service, ..) = service();
        service.enrol(&"u1".to_string(), &"v1".to_string(), vec!["svc1".into()], 20.0, vec![]).unwrap();
        let err = service.enrol(&"u1".to_string(), &"v1".to_string(), vec!["svc1".into()], 20.0, vec![]).unwrap_err();
        assert!(matches!(err, QueueError::AlreadyInQueue));
    }

    #[tokio::test]
    async fn notify_rejects_invalid_window() {
        let (service, ..) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        let err = service.notify(&entry.id, 7).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn full_happy_path_auto_approved_check_in() {
        let (service, store, _manual, _bus) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec!["svc1".into()], 20.0, vec![]).unwrap();
        service.notify(&entry.id, 10).await.unwrap();

        let loc = GeoPoint { latitude: 12.97162, longitude: 77.59461, accuracy: Some(10.0) };
        let updated = service.check_in(&entry.id, Some(loc)).unwrap();
        assert_eq!(updated.status, QueueStatus::Nearby);

        let updated = service.update_status(&entry.id, QueueStatus::InProgress, "admin:a1").await.unwrap();
        assert_eq!(updated.status, QueueStatus::InProgress);

        let updated = service.update_status(&entry.id, QueueStatus::Completed, "admin:a1").await.unwrap();
        assert_eq!(updated.status, QueueStatus::Completed);
        assert_eq!(store.get_entry(&entry.id).unwrap().status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn check_in_too_far_rejected_and_stays_notified() {
        let (service, store, _manual, _bus) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        service.notify(&entry.id, 10).await.unwrap();

        let far = GeoPoint { latitude: 13.5, longitude: 78.5, accuracy: Some(10.0) };
        let err = service.check_in(&entry.id, Some(far)).unwrap_err();
        assert!(matches!(err, QueueError::LocationTooFar));
        assert_eq!(store.get_entry(&entry.id).unwrap().status, QueueStatus::Notified);
    }

    #[test]
    fn check_in_before_notify_is_invalid_transition() {
        let (service, ..) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        let loc = GeoPoint { latitude: 12.97162, longitude: 77.59461, accuracy: Some(10.0) };
        let err = service.check_in(&entry.id, Some(loc)).unwrap_err();
        assert!(matches!(err, QueueError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn cancel_marks_no_show_with_customer_reason_and_no_reputation_hit() {
        let (service, _store, _manual, _bus) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        let updated = service.cancel(&entry.id, "user:u1").unwrap();
        assert_eq!(updated.status, QueueStatus::NoShow);
        assert_eq!(updated.no_show_reason.as_deref(), Some("cancelled_by_customer"));
        assert_eq!(service.reputation.get("u1").no_shows, 0);
    }

    #[tokio::test]
    async fn check_in_broadcasts_customer_arrived_to_venue_owner() {
        let (service, _store, _manual, bus) = service();
        let (conn_id, mut rx) = bus.register();
        bus.authenticate(conn_id, "owner1".to_string());

        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        service.notify(&entry.id, 10).await.unwrap();
        // drain the queue_notification frame the notifier sent to the customer (different user, won't arrive here)
        let loc = GeoPoint { latitude: 12.97162, longitude: 77.59461, accuracy: Some(10.0) };
        service.check_in(&entry.id, Some(loc)).unwrap();

        let msg = rx.try_recv().unwrap();
        match msg {
            axum::extract::ws::Message::Text(t) => {
                assert!(t.contains("customer_arrived"));
                assert!(t.contains("\"verified\":true"));
                assert!(t.contains("\"requiresConfirmation\":false"));
            }
            _ => panic!("expected a text frame"),
        }
    }

    #[tokio::test]
    async fn scenario_2_distant_checkin_then_operator_rejects_back_to_notified() {
        let (service, store, _manual, _bus) = service();
        let entry = service.enrol(&"u1".to_string(), &"v1".to_string(), vec![], 0.0, vec![]).unwrap();
        service.notify(&entry.id, 10).await.unwrap();

        // ~935m away: outside the 50m `new`-tier radius but inside the 1000m review band.
        let far = GeoPoint { latitude: 12.9800, longitude: 77.5946, accuracy: Some(10.0) };
        let updated = service.check_in(&entry.id, Some(far)).unwrap();
        assert_eq!(updated.status, QueueStatus::PendingVerification);

        let updated = service.verify_arrival(&entry.id, &"owner1".to_string(), false).await.unwrap();
        assert_eq!(updated.status, QueueStatus::Notified);
        assert_eq!(store.get_entry(&entry.id).unwrap().status, QueueStatus::Notified);
    }
}
