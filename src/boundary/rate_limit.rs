//! Fixed-window rate limiter. §4.L.
//!
//! Same `DashMap<Key, RateEntry>` fixed-window idiom as the reference
//! ingestion server's `check_rl`/`check_geo_rl`: a window resets whenever
//! it's found stale, otherwise the counter increments until it hits the
//! configured ceiling.

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::errors::{QueueError, QueueResult};

struct RateEntry {
    count: u32,
    window_start_ms: i64,
}

pub struct RateLimiter {
    entries: DashMap<String, RateEntry>,
    window_ms: i64,
    max: u32,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(window_ms: i64, max: u32, clock: SharedClock) -> Self {
        Self { entries: DashMap::new(), window_ms, max, clock }
    }

    /// Check-in limiter: 3 attempts per 5 minutes, keyed by (userId, queueId).
    pub fn check_in(clock: SharedClock) -> Self {
        Self::new(5 * 60 * 1000, 3, clock)
    }

    /// Notify limiter: 10 notifications per hour, keyed by queueId.
    pub fn notify(clock: SharedClock) -> Self {
        Self::new(60 * 60 * 1000, 10, clock)
    }

    /// General API limiter: 100 requests per 15 minutes, keyed by userId.
    pub fn general_api(clock: SharedClock) -> Self {
        Self::new(15 * 60 * 1000, 100, clock)
    }

    /// Returns Ok(()) if the call is allowed, incrementing the window
    /// counter as a side effect; otherwise `RateLimitExceeded` with the
    /// seconds remaining until the window resets.
    pub fn check(&self, key: &str) -> QueueResult<()> {
        let now = self.clock.now_ms();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateEntry { count: 0, window_start_ms: now });

        if now.saturating_sub(entry.window_start_ms) > self.window_ms {
            entry.count = 1;
            entry.window_start_ms = now;
            return Ok(());
        }

        if entry.count < self.max {
            entry.count += 1;
            Ok(())
        } else {
            let retry_after_secs = ((self.window_ms - (now - entry.window_start_ms)) / 1000).max(1) as u64;
            Err(QueueError::RateLimitExceeded { retry_after_secs })
        }
    }
}

pub type SharedRateLimiter = Arc<RateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn allows_up_to_max_then_rejects() {
        let manual = ManualClock::new(0);
        let clock: SharedClock = Arc::new(manual);
        let limiter = RateLimiter::new(60_000, 3, clock);
        assert!(limiter.check("k1").is_ok());
        assert!(limiter.check("k1").is_ok());
        assert!(limiter.check("k1").is_ok());
        assert!(matches!(limiter.check("k1"), Err(QueueError::RateLimitExceeded { .. })));
    }

    #[test]
    fn window_resets_after_elapsed_time() {
        let manual = ManualClock::new(0);
        let clock: SharedClock = Arc::new(manual.clone());
        let limiter = RateLimiter::new(60_000, 1, clock);
        assert!(limiter.check("k1").is_ok());
        assert!(limiter.check("k1").is_err());
        manual.advance_secs(61);
        assert!(limiter.check("k1").is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let manual = ManualClock::new(0);
        let clock: SharedClock = Arc::new(manual);
        let limiter = RateLimiter::new(60_000, 1, clock);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
    }
}
