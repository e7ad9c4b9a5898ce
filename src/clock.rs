//! Time seam. Sweepers, rate limiters, breakers and the offline buffer all
//! read "now" through this trait instead of calling `chrono`/`tokio::time`
//! directly, so tests can drive them with a manually-advanced clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Deterministic clock for tests: starts at an arbitrary epoch and only
/// advances when `advance` is called.
#[derive(Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, delta: i64) {
        self.advance_ms(delta * 1000);
    }

    pub fn advance_mins(&self, delta: i64) {
        self.advance_secs(delta * 60);
    }

    pub fn set_ms(&self, value: i64) {
        self.millis.store(value, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let c = ManualClock::new(1_000);
        assert_eq!(c.now_ms(), 1_000);
        c.advance_secs(5);
        assert_eq!(c.now_ms(), 6_000);
        c.advance_mins(1);
        assert_eq!(c.now_ms(), 66_000);
    }
}
