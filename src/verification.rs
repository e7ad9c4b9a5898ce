//! Arrival verification engine. §4.C.
//!
//! Maps `(user, user-location?, venue-location)` to an approve / review /
//! reject decision, consulting reputation (§4.B) for the tier-gated
//! auto-approval radius and the audit trail (§4.D) for suspicious-pattern
//! detection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::geo;
use crate::models::{GeoPoint, ReputationTier, UserId, VenueId};
use crate::reputation::SharedReputationStore;
use crate::store::SharedStore;

const SUSPICIOUS_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;
const REPEATED_LOCATION_LOOKBACK: usize = 10;
const REPEATED_LOCATION_THRESHOLD: usize = 3;
const FAST_CHECKIN_MS: i64 = 2 * 60 * 1000;
const OUTSIDE_AUTO_RANGE_METERS: u32 = 1000;

#[derive(Clone, Debug, PartialEq)]
pub struct VerificationDecision {
    pub verified: bool,
    pub distance_meters: Option<u32>,
    pub auto_approved: bool,
    pub requires_review: bool,
    pub reason: String,
    pub suspicious_reasons: Vec<String>,
}

impl VerificationDecision {
    pub fn suspicious(&self) -> bool {
        !self.suspicious_reasons.is_empty()
    }
}

pub struct VerificationEngine {
    reputation: SharedReputationStore,
    audit: Arc<AuditLog>,
    store: SharedStore,
}

impl VerificationEngine {
    pub fn new(reputation: SharedReputationStore, audit: Arc<AuditLog>, store: SharedStore) -> Self {
        Self { reputation, audit, store }
    }

    /// `notified_at_ms` and `check_in_attempted_at_ms` drive the fast-checkin
    /// pattern; both are timestamps already recorded on the queue entry by
    /// the caller (§4.K `checkIn`).
    pub fn evaluate(
        &self,
        user_id: &UserId,
        current_venue_id: &VenueId,
        user_location: Option<GeoPoint>,
        venue_location: GeoPoint,
        notified_at_ms: Option<i64>,
        check_in_attempted_at_ms: i64,
        now_ms: i64,
    ) -> VerificationDecision {
        let reputation = self.reputation.get(user_id);

        if reputation.tier == ReputationTier::Banned {
            return VerificationDecision {
                verified: false,
                distance_meters: None,
                auto_approved: false,
                requires_review: false,
                reason: "banned".into(),
                suspicious_reasons: vec![],
            };
        }

        let Some(user_location) = user_location else {
            return VerificationDecision {
                verified: false,
                distance_meters: None,
                auto_approved: false,
                requires_review: true,
                reason: "no location provided".into(),
                suspicious_reasons: vec![],
            };
        };

        let distance = match geo::distance_meters(&user_location, &venue_location) {
            Ok(d) => d,
            Err(_) => {
                return VerificationDecision {
                    verified: false,
                    distance_meters: None,
                    auto_approved: false,
                    requires_review: false,
                    reason: "invalid coordinates".into(),
                    suspicious_reasons: vec![],
                }
            }
        };

        let radius = reputation.tier.auto_approval_radius_meters();

        let suspicious_reasons = self.detect_suspicious_patterns(
            user_id,
            current_venue_id,
            &user_location,
            notified_at_ms,
            check_in_attempted_at_ms,
            now_ms,
        );

        if !suspicious_reasons.is_empty() || reputation.tier == ReputationTier::Suspicious {
            let reason = suspicious_reasons
                .first()
                .cloned()
                .unwrap_or_else(|| "suspicious tier".to_string());
            return VerificationDecision {
                verified: true,
                distance_meters: Some(distance),
                auto_approved: false,
                requires_review: true,
                reason,
                suspicious_reasons,
            };
        }

        if distance <= radius {
            return VerificationDecision {
                verified: true,
                distance_meters: Some(distance),
                auto_approved: true,
                requires_review: false,
                reason: "within auto-approval radius".into(),
                suspicious_reasons: vec![],
            };
        }

        if distance <= OUTSIDE_AUTO_RANGE_METERS {
            return VerificationDecision {
                verified: true,
                distance_meters: Some(distance),
                auto_approved: false,
                requires_review: true,
                reason: "outside auto range".into(),
                suspicious_reasons: vec![],
            };
        }

        VerificationDecision {
            verified: false,
            distance_meters: Some(distance),
            auto_approved: false,
            requires_review: false,
            reason: "too far".into(),
            suspicious_reasons: vec![],
        }
    }

    fn detect_suspicious_patterns(
        &self,
        user_id: &UserId,
        current_venue_id: &VenueId,
        user_location: &GeoPoint,
        notified_at_ms: Option<i64>,
        check_in_attempted_at_ms: i64,
        now_ms: i64,
    ) -> Vec<String> {
        let mut reasons = Vec::new();

        let mut recent: Vec<_> = self
            .audit
            .checkins_for_user(user_id)
            .into_iter()
            .filter(|l| now_ms.saturating_sub(l.timestamp_ms) <= SUSPICIOUS_WINDOW_MS)
            .collect();
        recent.sort_by_key(|l| std::cmp::Reverse(l.timestamp_ms));
        recent.truncate(REPEATED_LOCATION_LOOKBACK);

        let mut counts: HashMap<(i64, i64), usize> = HashMap::new();
        for log in &recent {
            if let Some(loc) = &log.user_location {
                let key = (
                    (loc.latitude * 10_000.0).round() as i64,
                    (loc.longitude * 10_000.0).round() as i64,
                );
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        if counts.values().any(|&c| c > REPEATED_LOCATION_THRESHOLD) {
            reasons.push("repeated check-in location".to_string());
        }

        if let Some(notified_at) = notified_at_ms {
            if check_in_attempted_at_ms.saturating_sub(notified_at) < FAST_CHECKIN_MS {
                reasons.push("check-in too soon after notification".to_string());
            }
        }

        let active_venues: std::collections::HashSet<_> = self
            .store
            .active_entries_for_user(user_id)
            .into_iter()
            .map(|e| e.venue_id)
            .chain(std::iter::once(current_venue_id.clone()))
            .collect();
        if active_venues.len() >= 2 {
            reasons.push("active in multiple venues".to_string());
        }

        let _ = user_location;
        reasons
    }
}
