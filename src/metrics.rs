//! In-process counters exposed at `/metrics`. §4.N, ambient.
//!
//! Same shape as the reference server's `Metrics`/`MResp` pair: one
//! `AtomicU64` per counter, loaded with `Relaxed` ordering into a plain
//! serializable snapshot struct on request.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    enrolled: AtomicU64,
    notified: AtomicU64,
    checked_in: AtomicU64,
    check_in_rejected: AtomicU64,
    verification_pending: AtomicU64,
    verified: AtomicU64,
    no_shows: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    circuit_trips: AtomicU64,
    rate_limited: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enrolled(&self) {
        self.enrolled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notified(&self) {
        self.notified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_checked_in(&self) {
        self.checked_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_check_in_rejected(&self) {
        self.check_in_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verification_pending(&self) {
        self.verification_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_no_shows(&self) {
        self.no_shows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circuit_trips(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsResponse {
        MetricsResponse {
            enrolled: self.enrolled.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            checked_in: self.checked_in.load(Ordering::Relaxed),
            check_in_rejected: self.check_in_rejected.load(Ordering::Relaxed),
            verification_pending: self.verification_pending.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            no_shows: self.no_shows.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    enrolled: u64,
    notified: u64,
    checked_in: u64,
    check_in_rejected: u64,
    verification_pending: u64,
    verified: u64,
    no_shows: u64,
    completed: u64,
    cancelled: u64,
    notifications_sent: u64,
    notifications_failed: u64,
    circuit_trips: u64,
    rate_limited: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = Metrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.enrolled, 0);
        assert_eq!(snap.completed, 0);
    }

    #[test]
    fn increments_are_reflected_in_snapshot() {
        let m = Metrics::new();
        m.inc_enrolled();
        m.inc_enrolled();
        m.inc_no_shows();
        let snap = m.snapshot();
        assert_eq!(snap.enrolled, 2);
        assert_eq!(snap.no_shows, 1);
    }
}
