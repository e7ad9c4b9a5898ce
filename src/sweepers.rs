//! Background sweepers. §4.J.
//!
//! Two interval-driven passes over entries in a specific status, each
//! transitioning entries whose deadline has elapsed. Both run once
//! immediately on startup (tokio's first `interval` tick fires right away)
//! and then on their own cadence. An `AtomicBool` guard skips a tick rather
//! than overlapping runs, mirroring the reference server's single-in-flight
//! `eviction` loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::{AuditLog, TransitionRecord};
use crate::clock::SharedClock;
use crate::models::QueueStatus;
use crate::service::QueueService;
use crate::store::SharedStore;

const NO_SHOW_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const NO_SHOW_DEADLINE_MS: i64 = 20 * 60 * 1000;
const NO_SHOW_REASON: &str = "did not respond within 20 minutes";

const PENDING_VERIFICATION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const PENDING_VERIFICATION_DEADLINE_MS: i64 = 5 * 60 * 1000;

/// Marks `notified` entries that have sat past the 20-minute deadline as
/// `no-show`, routed through [`QueueService::update_status_with_reason`] so
/// the reputation penalty, `no_show` notification and position recompute
/// all happen exactly as they would for an operator-driven no-show.
/// Returns the number of entries swept.
pub async fn sweep_no_shows_once(store: &SharedStore, service: &QueueService, clock: &SharedClock) -> usize {
    let now = clock.now_ms();
    let due: Vec<_> = store
        .entries_in_status(QueueStatus::Notified)
        .into_iter()
        .filter(|entry| entry.notified_at_ms.is_some_and(|t| now.saturating_sub(t) >= NO_SHOW_DEADLINE_MS))
        .collect();

    let mut swept = 0;
    for entry in due {
        let result = service
            .update_status_with_reason(
                &entry.id,
                QueueStatus::NoShow,
                "system:no_show_sweep",
                Some(NO_SHOW_REASON.to_string()),
            )
            .await;
        if result.is_ok() {
            swept += 1;
        }
    }
    swept
}

/// Reverts `pending_verification` entries that have sat past the 5-minute
/// deadline back to `notified`, with no reputation effect (the user may
/// simply have had a slow connection).
pub fn sweep_pending_verification_timeouts_once(store: &SharedStore, audit: &AuditLog, clock: &SharedClock) -> usize {
    let now = clock.now_ms();
    let mut swept = 0;
    for entry in store.entries_in_status(QueueStatus::PendingVerification) {
        let Some(attempted_at) = entry.check_in_attempted_at_ms else { continue };
        if now.saturating_sub(attempted_at) < PENDING_VERIFICATION_DEADLINE_MS {
            continue;
        }

        let mut updated = entry.clone();
        updated.status = QueueStatus::Notified;
        if store.update_entry(updated).is_err() {
            continue;
        }

        audit.record_transition(TransitionRecord {
            queue_id: entry.id.clone(),
            old_status: QueueStatus::PendingVerification,
            new_status: QueueStatus::Notified,
            actor: "system:pending_verification_sweep".to_string(),
            reason: Some("verification attempt timed out".to_string()),
            timestamp_ms: now,
        });
        swept += 1;
    }
    swept
}

pub async fn run_no_show_sweep(store: SharedStore, service: Arc<QueueService>, clock: SharedClock) {
    let running = Arc::new(AtomicBool::new(false));
    let mut interval = tokio::time::interval(NO_SHOW_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if running.swap(true, Ordering::SeqCst) {
            warn!("no_show_sweep_skipped_overlap");
            continue;
        }
        let swept = sweep_no_shows_once(&store, &service, &clock).await;
        if swept > 0 {
            info!(swept, "no_show_sweep_completed");
        }
        running.store(false, Ordering::SeqCst);
    }
}

pub async fn run_pending_verification_sweep(store: SharedStore, audit: Arc<AuditLog>, clock: SharedClock) {
    let running = Arc::new(AtomicBool::new(false));
    let mut interval = tokio::time::interval(PENDING_VERIFICATION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if running.swap(true, Ordering::SeqCst) {
            warn!("pending_verification_sweep_skipped_overlap");
            continue;
        }
        let swept = sweep_pending_verification_timeouts_once(&store, &audit, &clock);
        if swept > 0 {
            info!(swept, "pending_verification_sweep_completed");
        }
        running.store(false, Ordering::SeqCst);
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
    use crate::models::{QueueEntry, Venue};
    use crate::notifier::NotificationDispatcher;
    use crate::reputation::{ReputationStore, SharedReputationStore};
    use crate::resilience::OfflineBuffer;
    use crate::store::InMemoryStore;
    use crate::verification::VerificationEngine;

    fn setup() -> (SharedStore, QueueService, SharedReputationStore, Arc<AuditLog>, ManualClock, SharedClock) {
        let manual = ManualClock::new(0);
        let clock: SharedClock = Arc::new(manual.clone());
        let store: SharedStore = Arc::new(InMemoryStore::new());
        store.put_venue(Venue {
            id: "v1".into(),
            owner_user_id: "owner1".into(),
            latitude: 12.9716,
            longitude: 77.5946,
            name: "Test Salon".into(),
            address: "123 Test St".into(),
        });
        let reputation = Arc::new(ReputationStore::new(clock.clone()));
        let audit = AuditLog::spawn(std::env::temp_dir().join(format!("sweep-test-{}", uuid::Uuid::new_v4())));
        let verification = VerificationEngine::new(reputation.clone(), audit.clone(), store.clone());
        let bus = Arc::new(RealtimeBus::new(clock.clone()));
        let offline_buffer = Arc::new(OfflineBuffer::new(clock.clone()));
        bus.set_offline_buffer(offline_buffer.clone());
        let external: Arc<dyn ExternalMessageSender> = Arc::new(NullExternalMessageSender::default());
        let push = Arc::new(NullWebPushSender::default());
        let notifier =
            NotificationDispatcher::new(bus.clone(), external, push, store.clone(), audit.clone(), clock.clone(), offline_buffer);
        let service = QueueService::new(store.clone(), reputation.clone(), audit.clone(), verification, notifier, bus, clock.clone());
        (store, service, reputation, audit, manual, clock)
    }

    #[tokio::test]
    async fn no_show_sweep_marks_entries_past_deadline() {
        let (store, service, reputation, _audit, manual, clock) = setup();
        let mut entry = QueueEntry::new("q1".into(), "v1".into(), "u1".into(), vec![], 0.0, vec![], 0);
        entry.status = QueueStatus::Notified;
        entry.notified_at_ms = Some(0);
        store.create_entry(entry).unwrap();

        assert_eq!(sweep_no_shows_once(&store, &service, &clock).await, 0);

        manual.advance_mins(21);

        let swept = sweep_no_shows_once(&store, &service, &clock).await;
        assert_eq!(swept, 1);
        let updated = store.get_entry("q1").unwrap();
        assert_eq!(updated.status, QueueStatus::NoShow);
        assert_eq!(updated.no_show_reason.as_deref(), Some("did not respond within 20 minutes"));
        assert_eq!(reputation.get("u1").no_shows, 1);
    }

    #[test]
    fn pending_verification_sweep_reverts_to_notified() {
        let (store, _service, _reputation, audit, manual, clock) = setup();
        let mut entry = QueueEntry::new("q1".into(), "v1".into(), "u1".into(), vec![], 0.0, vec![], 0);
        entry.status = QueueStatus::PendingVerification;
        entry.check_in_attempted_at_ms = Some(0);
        store.create_entry(entry).unwrap();

        manual.advance_mins(6);

        let swept = sweep_pending_verification_timeouts_once(&store, &audit, &clock);
        assert_eq!(swept, 1);
        let updated = store.get_entry("q1").unwrap();
        assert_eq!(updated.status, QueueStatus::Notified);
    }

    #[tokio::test]
    async fn entries_within_deadline_are_left_alone() {
        let (store, service, _reputation, _audit, manual, clock) = setup();
        let mut entry = QueueEntry::new("q1".into(), "v1".into(), "u1".into(), vec![], 0.0, vec![], 0);
        entry.status = QueueStatus::Notified;
        entry.notified_at_ms = Some(0);
        store.create_entry(entry).unwrap();

        manual.advance_mins(10);

        assert_eq!(sweep_no_shows_once(&store, &service, &clock).await, 0);
        assert_eq!(store.get_entry("q1").unwrap().status, QueueStatus::Notified);
    }

    #[tokio::test]
    async fn no_show_sweep_dispatches_notification_and_recomputes_positions() {
        let (store, service, _reputation, _audit, manual, clock) = setup();
        let mut swept_entry = QueueEntry::new("q1".into(), "v1".into(), "u1".into(), vec![], 0.0, vec![], 0);
        swept_entry.status = QueueStatus::Notified;
        swept_entry.notified_at_ms = Some(0);
        store.create_entry(swept_entry).unwrap();

        let mut waiting_entry = QueueEntry::new("q2".into(), "v1".into(), "u2".into(), vec![], 0.0, vec![], 1000);
        store.create_entry(waiting_entry.clone()).unwrap();
        waiting_entry.position = Some(2);
        store.update_entry(waiting_entry).unwrap();

        manual.advance_mins(21);
        let swept = sweep_no_shows_once(&store, &service, &clock).await;
        assert_eq!(swept, 1);

        // the remaining waiting entry moves up to position 1 once the
        // no-show drops out of the active set
        let q2 = store.get_entry("q2").unwrap();
        assert_eq!(q2.position, Some(1));
    }
}
