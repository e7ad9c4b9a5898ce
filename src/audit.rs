//! Append-only audit log writer. §4.D.
//!
//! In-memory indices are mutated synchronously (cheap, `DashMap`-backed) so
//! callers can query history immediately; durable NDJSON persistence is
//! fanned out to a background worker over an `mpsc` channel, exactly the
//! `persist_worker`/`flush` shape the reference ingestion server uses for its
//! packet log. A full channel or a failed file write is logged and dropped —
//! audit must never block or fail the caller's main path.

use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::models::{CheckInLog, NotificationLog, QueueId, QueueStatus, UserId};

#[derive(Clone, Debug, Serialize)]
pub struct TransitionRecord {
    pub queue_id: QueueId,
    pub old_status: QueueStatus,
    pub new_status: QueueStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind")]
enum AuditRecord {
    CheckIn(CheckInLog),
    Notification(NotificationLog),
    Transition(TransitionRecord),
}

pub struct AuditLog {
    checkins_by_user: DashMap<UserId, Vec<CheckInLog>>,
    checkins_all: DashMap<QueueId, Vec<CheckInLog>>,
    notifications_by_queue: DashMap<QueueId, Vec<NotificationLog>>,
    transitions: DashMap<QueueId, Vec<TransitionRecord>>,
    persist_tx: mpsc::Sender<AuditRecord>,
    dropped: AtomicU64,
}

impl AuditLog {
    /// Spawns the background NDJSON writer and returns the handle. `path`
    /// is where records are appended, one JSON line each.
    pub fn spawn(path: impl Into<PathBuf>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(10_000);
        let log = Arc::new(Self {
            checkins_by_user: DashMap::new(),
            checkins_all: DashMap::new(),
            notifications_by_queue: DashMap::new(),
            transitions: DashMap::new(),
            persist_tx: tx,
            dropped: AtomicU64::new(0),
        });
        tokio::spawn(persist_worker(rx, path.into()));
        log
    }

    pub fn record_checkin(&self, log: CheckInLog) {
        self.checkins_by_user
            .entry(log.user_id.clone())
            .or_default()
            .push(log.clone());
        self.checkins_all
            .entry(log.queue_id.clone())
            .or_default()
            .push(log.clone());
        self.enqueue(AuditRecord::CheckIn(log));
    }

    pub fn record_notification(&self, log: NotificationLog) {
        self.notifications_by_queue
            .entry(log.queue_id.clone())
            .or_default()
            .push(log.clone());
        self.enqueue(AuditRecord::Notification(log));
    }

    pub fn record_transition(&self, record: TransitionRecord) {
        self.transitions
            .entry(record.queue_id.clone())
            .or_default()
            .push(record.clone());
        self.enqueue(AuditRecord::Transition(record));
    }

    pub fn checkins_for_user(&self, user_id: &str) -> Vec<CheckInLog> {
        self.checkins_by_user
            .get(user_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn checkins_for_queue(&self, queue_id: &str) -> Vec<CheckInLog> {
        self.checkins_all
            .get(queue_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn notifications_for_queue(&self, queue_id: &str) -> Vec<NotificationLog> {
        self.notifications_by_queue
            .get(queue_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn enqueue(&self, record: AuditRecord) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.persist_tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(dropped_total = self.dropped.load(Ordering::Relaxed), "audit_persist_queue_full");
        }
    }
}

async fn persist_worker(mut rx: mpsc::Receiver<AuditRecord>, path: PathBuf) {
    while let Some(record) = rx.recv().await {
        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "audit_serialize_failed");
                continue;
            }
        };
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(mut f) => {
                if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                    error!(error = %e, "audit_write_failed");
                }
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "audit_log_open_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoPoint, VerificationMethod};

    fn sample_checkin(user_id: &str, queue_id: &str) -> CheckInLog {
        CheckInLog {
            id: "c1".into(),
            queue_id: queue_id.into(),
            user_id: user_id.into(),
            venue_id: "v1".into(),
            timestamp_ms: 0,
            user_location: Some(GeoPoint { latitude: 0.0, longitude: 0.0, accuracy: None }),
            venue_location: GeoPoint { latitude: 0.0, longitude: 0.0, accuracy: None },
            distance_meters: Some(2),
            method: Some(VerificationMethod::GpsAuto),
            auto_approved: true,
            requires_confirmation: false,
            success: true,
            reason: "auto-approved".into(),
            suspicious: false,
            suspicious_reasons: vec![],
            time_since_notification_ms: Some(60_000),
        }
    }

    #[tokio::test]
    async fn records_are_queryable_by_user_and_queue() {
        let dir = std::env::temp_dir().join(format!("audit-test-{}", uuid::Uuid::new_v4()));
        let log = AuditLog::spawn(dir.join("audit.ndjson"));
        log.record_checkin(sample_checkin("u1", "q1"));
        assert_eq!(log.checkins_for_user("u1").len(), 1);
        assert_eq!(log.checkins_for_queue("q1").len(), 1);
        assert!(log.checkins_for_user("nobody").is_empty());
    }

    #[tokio::test]
    async fn transitions_accumulate_per_queue() {
        let dir = std::env::temp_dir().join(format!("audit-test-{}", uuid::Uuid::new_v4()));
        let log = AuditLog::spawn(dir.join("audit.ndjson"));
        log.record_transition(TransitionRecord {
            queue_id: "q1".into(),
            old_status: QueueStatus::Waiting,
            new_status: QueueStatus::Notified,
            actor: "admin:a1".into(),
            reason: None,
            timestamp_ms: 0,
        });
        assert_eq!(log.transitions.get("q1").unwrap().len(), 1);
    }
}
