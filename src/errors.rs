//! Flat error taxonomy shared across every component. Each variant carries
//! enough context to render a user-facing message and an HTTP status without
//! leaking internals (per the propagation policy: unknown errors collapse to
//! `InternalError`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    // Location
    #[error("location permission denied")]
    LocationPermissionDenied,
    #[error("location unavailable")]
    LocationUnavailable,
    #[error("location request timed out")]
    LocationTimeout,
    #[error("location accuracy too low")]
    LocationAccuracyLow,
    #[error("check-in location too far from venue")]
    LocationTooFar,
    #[error("invalid coordinates")]
    InvalidCoordinates,

    // Verification
    #[error("suspicious check-in pattern detected")]
    SuspiciousPattern,
    #[error("verification pending operator review")]
    VerificationPending,
    #[error("verification failed")]
    VerificationFailed,
    #[error("verification timed out")]
    VerificationTimeout,

    // Rate limiting
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("notification rate limit exceeded")]
    NotificationRateLimit { retry_after_secs: u64 },

    // User status
    #[error("user is banned")]
    UserBanned,
    #[error("user flagged as suspicious")]
    UserSuspicious,
    #[error("user profile incomplete")]
    ProfileIncomplete,

    // Queue state
    #[error("queue entry not found")]
    QueueNotFound,
    #[error("invalid status transition")]
    InvalidStatusTransition { valid_statuses: Vec<String> },
    #[error("queue entry already completed")]
    QueueAlreadyCompleted,
    #[error("queue entry cancelled")]
    QueueCancelled,
    #[error("already in queue for this venue")]
    AlreadyInQueue,
    #[error("multiple active queues not permitted")]
    MultipleActiveQueues,

    // Authorization
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not the owner of this queue entry")]
    NotQueueOwner,
    #[error("not the owner of this venue")]
    NotVenueOwner,

    // Venue
    #[error("venue not found")]
    VenueNotFound,
    #[error("venue is closed")]
    VenueClosed,
    #[error("venue location missing")]
    VenueLocationMissing,

    // Notification
    #[error("notification failed")]
    NotificationFailed,
    #[error("external message delivery failed")]
    ExternalMessageFailed,
    #[error("realtime delivery failed")]
    RealtimeFailed,
    #[error("push delivery failed")]
    PushFailed,

    // Validation
    #[error("invalid input")]
    InvalidInput(String),
    #[error("missing required field: {0}")]
    MissingRequiredField(String),
    #[error("invalid queue id")]
    InvalidQueueId,
    #[error("invalid user id")]
    InvalidUserId,
    #[error("invalid venue id")]
    InvalidVenueId,

    // Server
    #[error("database error")]
    DatabaseError,
    #[error("internal error")]
    InternalError,
    #[error("service unavailable")]
    ServiceUnavailable,
}

impl QueueError {
    /// Stable machine-readable code, independent of the Display message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LocationPermissionDenied => "LocationPermissionDenied",
            Self::LocationUnavailable => "LocationUnavailable",
            Self::LocationTimeout => "LocationTimeout",
            Self::LocationAccuracyLow => "LocationAccuracyLow",
            Self::LocationTooFar => "LocationTooFar",
            Self::InvalidCoordinates => "InvalidCoordinates",
            Self::SuspiciousPattern => "SuspiciousPattern",
            Self::VerificationPending => "VerificationPending",
            Self::VerificationFailed => "VerificationFailed",
            Self::VerificationTimeout => "VerificationTimeout",
            Self::RateLimitExceeded { .. } => "RateLimitExceeded",
            Self::NotificationRateLimit { .. } => "NotificationRateLimit",
            Self::UserBanned => "UserBanned",
            Self::UserSuspicious => "UserSuspicious",
            Self::ProfileIncomplete => "ProfileIncomplete",
            Self::QueueNotFound => "QueueNotFound",
            Self::InvalidStatusTransition { .. } => "InvalidStatusTransition",
            Self::QueueAlreadyCompleted => "QueueAlreadyCompleted",
            Self::QueueCancelled => "QueueCancelled",
            Self::AlreadyInQueue => "AlreadyInQueue",
            Self::MultipleActiveQueues => "MultipleActiveQueues",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotQueueOwner => "NotQueueOwner",
            Self::NotVenueOwner => "NotVenueOwner",
            Self::VenueNotFound => "VenueNotFound",
            Self::VenueClosed => "VenueClosed",
            Self::VenueLocationMissing => "VenueLocationMissing",
            Self::NotificationFailed => "NotificationFailed",
            Self::ExternalMessageFailed => "ExternalMessageFailed",
            Self::RealtimeFailed => "RealtimeFailed",
            Self::PushFailed => "PushFailed",
            Self::InvalidInput(_) => "InvalidInput",
            Self::MissingRequiredField(_) => "MissingRequiredField",
            Self::InvalidQueueId => "InvalidQueueId",
            Self::InvalidUserId => "InvalidUserId",
            Self::InvalidVenueId => "InvalidVenueId",
            Self::DatabaseError => "DatabaseError",
            Self::InternalError => "InternalError",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::NotificationRateLimit { .. }
                | Self::NotificationFailed
                | Self::ExternalMessageFailed
                | Self::RealtimeFailed
                | Self::PushFailed
                | Self::DatabaseError
                | Self::ServiceUnavailable
                | Self::LocationTimeout
                | Self::VerificationTimeout
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCoordinates
            | Self::InvalidInput(_)
            | Self::MissingRequiredField(_)
            | Self::InvalidQueueId
            | Self::InvalidUserId
            | Self::InvalidVenueId
            | Self::LocationAccuracyLow => StatusCode::BAD_REQUEST,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            Self::Forbidden
            | Self::NotQueueOwner
            | Self::NotVenueOwner
            | Self::UserBanned
            | Self::UserSuspicious
            | Self::LocationPermissionDenied => StatusCode::FORBIDDEN,

            Self::QueueNotFound | Self::VenueNotFound => StatusCode::NOT_FOUND,

            Self::InvalidStatusTransition { .. }
            | Self::QueueAlreadyCompleted
            | Self::QueueCancelled
            | Self::AlreadyInQueue
            | Self::MultipleActiveQueues => StatusCode::CONFLICT,

            Self::RateLimitExceeded { .. } | Self::NotificationRateLimit { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            Self::DatabaseError | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            Self::NotificationRateLimit { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidStatusTransition { valid_statuses } => {
                Some(serde_json::json!({ "validStatuses": valid_statuses }))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.retryable(),
            details: self.details(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_maps_to_409() {
        let e = QueueError::InvalidStatusTransition {
            valid_statuses: vec!["notified".into(), "no-show".into()],
        };
        assert_eq!(e.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let e = QueueError::RateLimitExceeded { retry_after_secs: 42 };
        assert_eq!(e.retry_after_secs(), Some(42));
        assert_eq!(e.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn unauthorized_is_401() {
        assert_eq!(QueueError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }
}
