//! Position engine. §4.I.
//!
//! Recomputes 1..N positions per venue among non-terminal, non-in-progress
//! entries ordered by `createdAt` ascending. `in-progress` entries sit at
//! position 0 and are excluded from the 1..N sequence. Broadcasts a
//! `queue_position_update` frame to every affected connected client.

use std::sync::Arc;

use crate::channels::realtime::{queue_position_update_frame, SharedRealtimeBus};
use crate::clock::SharedClock;
use crate::errors::QueueResult;
use crate::models::{QueueEntry, QueueStatus, VenueId};
use crate::store::SharedStore;

const MINUTES_PER_POSITION: u32 = 30;

/// Recomputes positions for every active entry at `venue_id` and persists
/// the updated entries. Returns the updated entries in position order.
pub fn recompute_positions(store: &SharedStore, venue_id: &VenueId) -> QueueResult<Vec<QueueEntry>> {
    let mut entries = store.entries_for_venue(venue_id);

    let mut waiting: Vec<QueueEntry> = entries
        .iter()
        .filter(|e| e.is_active() && e.status != QueueStatus::InProgress)
        .cloned()
        .collect();
    waiting.sort_by_key(|e| e.created_at_ms);

    for (idx, entry) in waiting.iter_mut().enumerate() {
        let position = (idx + 1) as u32;
        entry.position = Some(position);
        entry.estimated_wait_minutes = Some((position - 1) * MINUTES_PER_POSITION);
        store.update_entry(entry.clone())?;
    }

    entries.retain(|e| e.status == QueueStatus::InProgress);
    for entry in entries.iter_mut() {
        entry.position = Some(0);
        entry.estimated_wait_minutes = Some(0);
        store.update_entry(entry.clone())?;
    }

    let mut all = waiting;
    all.extend(entries);
    all.sort_by_key(|e| e.position.unwrap_or(0));
    Ok(all)
}

/// Recomputes positions and broadcasts the new ordering over the realtime
/// bus to every waiting user at the venue, mirroring the fan-out shape the
/// notifier uses for single-user frames.
pub fn recompute_and_broadcast(
    store: &SharedStore,
    bus: &SharedRealtimeBus,
    clock: &SharedClock,
    venue_id: &VenueId,
) -> QueueResult<Vec<QueueEntry>> {
    let updated = recompute_positions(store, venue_id)?;
    let queues: Vec<_> = updated
        .iter()
        .filter(|e| e.status != QueueStatus::InProgress)
        .map(|e| {
            serde_json::json!({
                "queueId": e.id,
                "userId": e.user_id,
                "position": e.position,
                "status": e.status,
                "estimatedWaitMinutes": e.estimated_wait_minutes,
            })
        })
        .collect();
    let frame = queue_position_update_frame(clock.now_ms(), venue_id, serde_json::Value::Array(queues));
    for entry in &updated {
        if entry.status != QueueStatus::InProgress {
            bus.send(&entry.user_id, frame.clone());
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::channels::realtime::RealtimeBus;
    use crate::store::InMemoryStore;

    fn entry(id: &str, created_at_ms: i64) -> QueueEntry {
        QueueEntry::new(id.into(), "v1".into(), format!("u-{id}"), vec![], 0.0, vec![], created_at_ms)
    }

    #[test]
    fn positions_assigned_in_creation_order() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        store.create_entry(entry("q3", 3000)).unwrap();
        store.create_entry(entry("q1", 1000)).unwrap();
        store.create_entry(entry("q2", 2000)).unwrap();

        let updated = recompute_positions(&store, &"v1".to_string()).unwrap();
        let ids: Vec<_> = updated.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        assert_eq!(updated[0].position, Some(1));
        assert_eq!(updated[0].estimated_wait_minutes, Some(0));
        assert_eq!(updated[2].position, Some(3));
        assert_eq!(updated[2].estimated_wait_minutes, Some(60));
    }

    #[test]
    fn in_progress_entry_gets_position_zero_and_is_excluded_from_sequence() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let mut in_progress = entry("q1", 1000);
        in_progress.status = QueueStatus::InProgress;
        store.create_entry(in_progress).unwrap();
        store.create_entry(entry("q2", 2000)).unwrap();

        let updated = recompute_positions(&store, &"v1".to_string()).unwrap();
        let q1 = updated.iter().find(|e| e.id == "q1").unwrap();
        let q2 = updated.iter().find(|e| e.id == "q2").unwrap();
        assert_eq!(q1.position, Some(0));
        assert_eq!(q2.position, Some(1));
    }

    #[test]
    fn terminal_entries_are_ignored() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let mut done = entry("q1", 1000);
        done.status = QueueStatus::Completed;
        store.create_entry(done).unwrap();
        store.create_entry(entry("q2", 2000)).unwrap();

        let updated = recompute_positions(&store, &"v1".to_string()).unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "q2");
        assert_eq!(updated[0].position, Some(1));
    }

    #[test]
    fn broadcast_reaches_authenticated_waiting_users() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let bus = Arc::new(RealtimeBus::new(clock.clone()));
        let store: SharedStore = Arc::new(InMemoryStore::new());
        store.create_entry(entry("q1", 1000)).unwrap();

        let (conn_id, mut rx) = bus.register();
        bus.authenticate(conn_id, "u-q1".to_string());

        recompute_and_broadcast(&store, &bus, &clock, &"v1".to_string()).unwrap();
        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg, axum::extract::ws::Message::Text(t) if t.contains("queue_position_update")));
    }
}
