//! Per-user score/tier store. §4.B.
//!
//! Single-writer-per-user discipline is provided by `DashMap`'s per-shard
//! locking via `entry()` — the same idiom the reference ingestion server
//! uses for its rate-limit counters (`check_rl`/`check_geo_rl` over
//! `DashMap<Key, RateEntry>`). No extra per-user mutex layer is needed: the
//! shard lock held across the read-modify-write in `apply` already
//! serializes concurrent updates to the same user.

use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::models::{ReputationAction, ReputationTier, UserId, UserReputation};

pub struct ReputationStore {
    records: DashMap<UserId, UserReputation>,
    clock: SharedClock,
}

impl ReputationStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Returns the user's record, lazily creating it at score 50/tier `new`.
    pub fn get(&self, user_id: &str) -> UserReputation {
        let now = self.clock.now_ms();
        self.records
            .entry(user_id.to_string())
            .or_insert_with(|| UserReputation::new(user_id.to_string(), now))
            .clone()
    }

    pub fn is_banned(&self, user_id: &str) -> bool {
        self.get(user_id).is_banned()
    }

    /// Applies a reputation action, clamping the score to [0,100] and
    /// recomputing the tier. Returns the updated record.
    pub fn apply(&self, user_id: &str, action: ReputationAction) -> UserReputation {
        let now = self.clock.now_ms();
        let mut entry = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| UserReputation::new(user_id.to_string(), now));

        let delta = action.delta();
        let clamped = (entry.score as i16 + delta).clamp(0, 100) as u8;
        entry.score = clamped;
        entry.tier = ReputationTier::from_score(clamped);
        entry.updated_at_ms = now;

        match action {
            ReputationAction::SuccessfulCheckin => {
                entry.total_check_ins += 1;
                entry.successful_check_ins += 1;
                entry.last_check_in_at_ms = Some(now);
            }
            ReputationAction::FalseCheckin => {
                entry.total_check_ins += 1;
                entry.false_check_ins += 1;
                entry.last_check_in_at_ms = Some(now);
            }
            ReputationAction::NoShow => {
                entry.no_shows += 1;
                entry.last_no_show_at_ms = Some(now);
            }
            ReputationAction::CompletedService => {
                entry.completed_services += 1;
            }
            ReputationAction::AdminOverride => {
                entry.total_check_ins += 1;
                entry.false_check_ins += 1;
                entry.last_check_in_at_ms = Some(now);
            }
        }

        entry.clone()
    }
}

pub type SharedReputationStore = Arc<ReputationStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> ReputationStore {
        ReputationStore::new(Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn lazily_created_at_fifty_new() {
        let s = store();
        let r = s.get("u1");
        assert_eq!(r.score, 50);
        assert_eq!(r.tier, ReputationTier::New);
    }

    #[test]
    fn successful_checkin_bumps_score_by_two() {
        let s = store();
        let r = s.apply("u1", ReputationAction::SuccessfulCheckin);
        assert_eq!(r.score, 52);
        assert_eq!(r.successful_check_ins, 1);
        assert_eq!(r.total_check_ins, 1);
    }

    #[test]
    fn score_clamps_at_zero_and_hundred() {
        let s = store();
        for _ in 0..20 {
            s.apply("u1", ReputationAction::FalseCheckin);
        }
        assert_eq!(s.get("u1").score, 0);

        for _ in 0..40 {
            s.apply("u2", ReputationAction::SuccessfulCheckin);
        }
        assert_eq!(s.get("u2").score, 100);
    }

    #[test]
    fn no_show_drops_score_by_five_and_sets_timestamp() {
        let s = store();
        let r = s.apply("u1", ReputationAction::NoShow);
        assert_eq!(r.score, 45);
        assert_eq!(r.no_shows, 1);
        assert!(r.last_no_show_at_ms.is_some());
    }

    #[test]
    fn tier_updates_with_score() {
        let s = store();
        for _ in 0..20 {
            s.apply("u1", ReputationAction::SuccessfulCheckin);
        }
        assert_eq!(s.get("u1").tier, ReputationTier::Trusted);
    }

    #[test]
    fn is_banned_reflects_tier() {
        let s = store();
        for _ in 0..15 {
            s.apply("u1", ReputationAction::FalseCheckin);
        }
        assert!(s.is_banned("u1"));
    }
}
