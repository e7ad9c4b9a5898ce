//! Data model shared across every component: `QueueEntry`, `UserReputation`,
//! the append-only logs, and the id-only collaborators (`Venue`, `User`).

use serde::{Deserialize, Serialize};

pub type QueueId = String;
pub type VenueId = String;
pub type UserId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Notified,
    PendingVerification,
    Nearby,
    InProgress,
    Completed,
    NoShow,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::NoShow)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Notified => "notified",
            Self::PendingVerification => "pending_verification",
            Self::Nearby => "nearby",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::NoShow => "no-show",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    GpsAuto,
    Manual,
    AdminOverride,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueId,
    pub venue_id: VenueId,
    pub user_id: UserId,

    pub service_ids: Vec<String>,
    pub total_price: f64,
    pub applied_offer_ids: Vec<String>,

    pub position: Option<u32>,
    pub estimated_wait_minutes: Option<u32>,
    pub created_at_ms: i64,

    pub notified_at_ms: Option<i64>,
    pub notification_window_minutes: Option<u32>,
    pub check_in_attempted_at_ms: Option<i64>,
    pub check_in_location: Option<GeoPoint>,
    pub check_in_distance_meters: Option<u32>,
    pub verified_at_ms: Option<i64>,
    pub verification_method: Option<VerificationMethod>,
    pub verified_by_admin_id: Option<UserId>,
    pub service_started_at_ms: Option<i64>,
    pub service_completed_at_ms: Option<i64>,
    pub no_show_marked_at_ms: Option<i64>,
    pub no_show_reason: Option<String>,

    pub status: QueueStatus,
}

impl QueueEntry {
    pub fn new(
        id: QueueId,
        venue_id: VenueId,
        user_id: UserId,
        service_ids: Vec<String>,
        total_price: f64,
        applied_offer_ids: Vec<String>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id,
            venue_id,
            user_id,
            service_ids,
            total_price,
            applied_offer_ids,
            position: Some(0),
            estimated_wait_minutes: Some(0),
            created_at_ms,
            notified_at_ms: None,
            notification_window_minutes: None,
            check_in_attempted_at_ms: None,
            check_in_location: None,
            check_in_distance_meters: None,
            verified_at_ms: None,
            verification_method: None,
            verified_by_admin_id: None,
            service_started_at_ms: None,
            service_completed_at_ms: None,
            no_show_marked_at_ms: None,
            no_show_reason: None,
            status: QueueStatus::Waiting,
        }
    }

    /// True if this entry counts against the at-most-one-active-per-venue
    /// invariant (§3): not terminal.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationTier {
    Banned,
    Suspicious,
    New,
    Regular,
    Trusted,
}

impl ReputationTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Banned => "banned",
            Self::Suspicious => "suspicious",
            Self::New => "new",
            Self::Regular => "regular",
            Self::Trusted => "trusted",
        }
    }

    /// Tier derivation from a clamped [0,100] score. Ties bind to the higher
    /// tier: `score >= threshold` checked from the top down.
    pub fn from_score(score: u8) -> Self {
        if score >= 90 {
            Self::Trusted
        } else if score >= 70 {
            Self::Regular
        } else if score >= 40 {
            Self::New
        } else if score >= 20 {
            Self::Suspicious
        } else {
            Self::Banned
        }
    }

    /// Auto-approval radius in meters for this tier (§4.C).
    pub fn auto_approval_radius_meters(self) -> u32 {
        match self {
            Self::New => 50,
            Self::Regular => 100,
            Self::Trusted => 200,
            Self::Suspicious | Self::Banned => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReputationAction {
    SuccessfulCheckin,
    FalseCheckin,
    NoShow,
    CompletedService,
    AdminOverride,
}

impl ReputationAction {
    pub fn delta(self) -> i16 {
        match self {
            Self::SuccessfulCheckin => 2,
            Self::FalseCheckin => -10,
            Self::NoShow => -5,
            Self::CompletedService => 1,
            Self::AdminOverride => -3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserReputation {
    pub user_id: UserId,
    pub total_check_ins: u32,
    pub successful_check_ins: u32,
    pub false_check_ins: u32,
    pub no_shows: u32,
    pub completed_services: u32,
    pub score: u8,
    pub tier: ReputationTier,
    pub last_check_in_at_ms: Option<i64>,
    pub last_no_show_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl UserReputation {
    pub fn new(user_id: UserId, now_ms: i64) -> Self {
        Self {
            user_id,
            total_check_ins: 0,
            successful_check_ins: 0,
            false_check_ins: 0,
            no_shows: 0,
            completed_services: 0,
            score: 50,
            tier: ReputationTier::New,
            last_check_in_at_ms: None,
            last_no_show_at_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.tier == ReputationTier::Banned
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckInLog {
    pub id: String,
    pub queue_id: QueueId,
    pub user_id: UserId,
    pub venue_id: VenueId,
    pub timestamp_ms: i64,
    pub user_location: Option<GeoPoint>,
    pub venue_location: GeoPoint,
    pub distance_meters: Option<u32>,
    pub method: Option<VerificationMethod>,
    pub auto_approved: bool,
    pub requires_confirmation: bool,
    pub success: bool,
    pub reason: String,
    pub suspicious: bool,
    pub suspicious_reasons: Vec<String>,
    pub time_since_notification_ms: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationChannel {
    RealtimeBus,
    ExternalMsg,
    WebPush,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelResult {
    pub sent: bool,
    pub sent_at_ms: Option<i64>,
    pub error: Option<String>,
    pub delivered: Option<bool>,
}

impl ChannelResult {
    pub fn not_attempted() -> Self {
        Self {
            sent: false,
            sent_at_ms: None,
            error: None,
            delivered: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QueueNotification,
    ArrivalVerified,
    ServiceStarting,
    ServiceCompleted,
    NoShow,
    PositionUpdate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub queue_id: QueueId,
    pub user_id: UserId,
    pub timestamp_ms: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub realtime_bus: ChannelResult,
    pub external_msg: ChannelResult,
    pub web_push: ChannelResult,
    pub viewed: bool,
}

impl NotificationLog {
    pub fn any_channel_succeeded(&self) -> bool {
        self.realtime_bus.sent || self.external_msg.sent || self.web_push.sent
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub owner_user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub address: String,
}

impl Venue {
    pub fn location(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    VenueOwner,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: Option<String>,
    pub name: String,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_bind_high() {
        assert_eq!(ReputationTier::from_score(90), ReputationTier::Trusted);
        assert_eq!(ReputationTier::from_score(89), ReputationTier::Regular);
        assert_eq!(ReputationTier::from_score(70), ReputationTier::Regular);
        assert_eq!(ReputationTier::from_score(69), ReputationTier::New);
        assert_eq!(ReputationTier::from_score(40), ReputationTier::New);
        assert_eq!(ReputationTier::from_score(39), ReputationTier::Suspicious);
        assert_eq!(ReputationTier::from_score(20), ReputationTier::Suspicious);
        assert_eq!(ReputationTier::from_score(19), ReputationTier::Banned);
        assert_eq!(ReputationTier::from_score(0), ReputationTier::Banned);
    }

    #[test]
    fn auto_approval_radius_by_tier() {
        assert_eq!(ReputationTier::New.auto_approval_radius_meters(), 50);
        assert_eq!(ReputationTier::Regular.auto_approval_radius_meters(), 100);
        assert_eq!(ReputationTier::Trusted.auto_approval_radius_meters(), 200);
        assert_eq!(ReputationTier::Suspicious.auto_approval_radius_meters(), 0);
        assert_eq!(ReputationTier::Banned.auto_approval_radius_meters(), 0);
    }

    #[test]
    fn new_entry_is_active_and_waiting() {
        let e = QueueEntry::new(
            "q1".into(),
            "v1".into(),
            "u1".into(),
            vec!["svc1".into()],
            10.0,
            vec![],
            0,
        );
        assert!(e.is_active());
        assert_eq!(e.status, QueueStatus::Waiting);
    }
}
