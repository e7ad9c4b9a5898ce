//! Notification dispatcher. §4.G.
//!
//! Renders a `{title, body}` per `NotificationKind`, fans out concurrently
//! across the three channel adapters via `tokio::join!` (the fan-out width
//! is fixed at three, so a plain join is simpler than `FuturesUnordered`),
//! each wrapped by its own circuit breaker, and writes exactly one
//! `NotificationLog` regardless of outcome.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::channels::realtime::SharedRealtimeBus;
use crate::channels::{web_push, ExternalMessageSender, WebPushSender};
use crate::clock::SharedClock;
use crate::models::{ChannelResult, NotificationKind, NotificationLog, QueueId, UserId};
use crate::resilience::{CircuitBreaker, OfflineBuffer, RetryPolicy};
use crate::store::SharedStore;

#[derive(Clone, Debug, Default)]
pub struct TemplateData {
    pub venue_name: String,
    pub venue_address: String,
    pub estimated_minutes: Option<u32>,
    pub services: Vec<String>,
    pub position: Option<u32>,
    pub extra: serde_json::Value,
}

fn render(kind: NotificationKind, data: &TemplateData) -> (String, String) {
    match kind {
        NotificationKind::QueueNotification => (
            "Your turn is coming up".to_string(),
            format!(
                "Your turn is coming up at {} in about {} minutes. Services: {}. Address: {}",
                data.venue_name,
                data.estimated_minutes.unwrap_or(0),
                data.services.join(", "),
                data.venue_address
            ),
        ),
        NotificationKind::ArrivalVerified => (
            "You're verified".to_string(),
            format!("We've confirmed your arrival at {}.", data.venue_name),
        ),
        NotificationKind::ServiceStarting => (
            "Your service is starting".to_string(),
            format!("{} is ready for you now.", data.venue_name),
        ),
        NotificationKind::ServiceCompleted => (
            "Service completed".to_string(),
            format!("Thanks for visiting {}! We hope to see you again.", data.venue_name),
        ),
        NotificationKind::NoShow => (
            "We missed you".to_string(),
            format!("You were marked as a no-show at {}.", data.venue_name),
        ),
        NotificationKind::PositionUpdate => (
            "Queue update".to_string(),
            format!(
                "You are now #{} in line at {}, estimated wait {} minutes.",
                data.position.unwrap_or(0),
                data.venue_name,
                data.estimated_minutes.unwrap_or(0)
            ),
        ),
    }
}

pub struct NotificationDispatcher {
    bus: SharedRealtimeBus,
    external_sender: Arc<dyn ExternalMessageSender>,
    push_sender: Arc<dyn WebPushSender>,
    store: SharedStore,
    audit: Arc<AuditLog>,
    clock: SharedClock,

    realtime_breaker: CircuitBreaker,
    external_breaker: CircuitBreaker,
    push_breaker: CircuitBreaker,
    offline_buffer: Arc<OfflineBuffer>,
    retry: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        bus: SharedRealtimeBus,
        external_sender: Arc<dyn ExternalMessageSender>,
        push_sender: Arc<dyn WebPushSender>,
        store: SharedStore,
        audit: Arc<AuditLog>,
        clock: SharedClock,
        offline_buffer: Arc<OfflineBuffer>,
    ) -> Self {
        Self {
            realtime_breaker: CircuitBreaker::realtime(clock.clone()),
            external_breaker: CircuitBreaker::external_msg(clock.clone()),
            push_breaker: CircuitBreaker::push(clock.clone()),
            bus,
            external_sender,
            push_sender,
            store,
            audit,
            clock,
            offline_buffer,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn notify(
        &self,
        user_id: &UserId,
        queue_id: &QueueId,
        kind: NotificationKind,
        data: TemplateData,
    ) -> NotificationLog {
        let (title, body) = render(kind, &data);
        let now = self.clock.now_ms();

        let realtime_result = self.send_realtime(user_id, &title, &body, kind, &data);
        let (external_result, push_result) = tokio::join!(
            self.send_external(user_id, &body),
            self.send_push(user_id, &title, &body)
        );

        let log = NotificationLog {
            id: Uuid::new_v4().to_string(),
            queue_id: queue_id.clone(),
            user_id: user_id.clone(),
            timestamp_ms: now,
            kind,
            title,
            body,
            realtime_bus: realtime_result,
            external_msg: external_result,
            web_push: push_result,
            viewed: false,
        };
        self.audit.record_notification(log.clone());
        log
    }

    fn send_realtime(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        kind: NotificationKind,
        data: &TemplateData,
    ) -> ChannelResult {
        let now = self.clock.now_ms();
        let frame = serde_json::json!({
            "type": "notification",
            "kind": kind,
            "timestamp": now,
            "title": title,
            "body": body,
            "extra": data.extra,
        });

        if !self.realtime_breaker.allow_request() {
            self.offline_buffer.enqueue(user_id.to_string(), frame);
            return ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("circuit open".to_string()),
                delivered: Some(false),
            };
        }

        let delivered = self.bus.send(user_id, frame.clone());
        if delivered {
            self.realtime_breaker.record_success();
            ChannelResult {
                sent: true,
                sent_at_ms: Some(now),
                error: None,
                delivered: Some(true),
            }
        } else {
            self.offline_buffer.enqueue(user_id.to_string(), frame);
            self.realtime_breaker.record_success();
            ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("user offline, buffered".to_string()),
                delivered: Some(false),
            }
        }
    }

    async fn send_external(&self, user_id: &str, body: &str) -> ChannelResult {
        let now = self.clock.now_ms();
        let Ok(user) = self.store.get_user(user_id) else {
            return ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("user not found".to_string()),
                delivered: None,
            };
        };
        let Some(phone) = user.phone else {
            return ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("no phone on file".to_string()),
                delivered: None,
            };
        };

        if !self.external_breaker.allow_request() {
            return ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("circuit open".to_string()),
                delivered: Some(false),
            };
        }

        let sender = self.external_sender.clone();
        let body = body.to_string();
        let result = self
            .retry
            .run(
                |_e: &String| true,
                move || {
                    let sender = sender.clone();
                    let phone = phone.clone();
                    let body = body.clone();
                    async move { sender.send(&phone, &body).await }
                },
            )
            .await;

        match result {
            Ok(true) => {
                self.external_breaker.record_success();
                ChannelResult {
                    sent: true,
                    sent_at_ms: Some(now),
                    error: None,
                    delivered: Some(true),
                }
            }
            Ok(false) => {
                self.external_breaker.record_failure();
                ChannelResult {
                    sent: false,
                    sent_at_ms: None,
                    error: Some("provider rejected message".to_string()),
                    delivered: Some(false),
                }
            }
            Err(e) => {
                self.external_breaker.record_failure();
                ChannelResult {
                    sent: false,
                    sent_at_ms: None,
                    error: Some(e),
                    delivered: Some(false),
                }
            }
        }
    }

    async fn send_push(&self, user_id: &str, title: &str, body: &str) -> ChannelResult {
        let now = self.clock.now_ms();
        if !self.push_breaker.allow_request() {
            return ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("circuit open".to_string()),
                delivered: Some(false),
            };
        }

        let payload = serde_json::json!({ "title": title, "body": body });
        let delivered = web_push::push_to_user(self.push_sender.as_ref(), &self.store, user_id, &payload).await;
        if delivered {
            self.push_breaker.record_success();
            ChannelResult {
                sent: true,
                sent_at_ms: Some(now),
                error: None,
                delivered: Some(true),
            }
        } else {
            self.push_breaker.record_failure();
            ChannelResult {
                sent: false,
                sent_at_ms: None,
                error: Some("no subscription delivered".to_string()),
                delivered: Some(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::external_msg::NullExternalMessageSender;
    use crate::channels::realtime::RealtimeBus;
    use crate::channels::web_push::{NullWebPushSender, PushOutcome};
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use crate::models::{Role, User};

    fn dispatcher(external_fails: bool) -> (NotificationDispatcher, Arc<RealtimeBus>, SharedStore) {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let bus = Arc::new(RealtimeBus::new(clock.clone()));
        let store: SharedStore = Arc::new(InMemoryStore::new());
        store.put_user(User {
            id: "u1".into(),
            phone: Some("+15551234567".into()),
            name: "Test User".into(),
            role: Role::Customer,
        });
        let audit = AuditLog::spawn(std::env::temp_dir().join(format!("notif-test-{}", Uuid::new_v4())));
        let offline_buffer = Arc::new(OfflineBuffer::new(clock.clone()));
        bus.set_offline_buffer(offline_buffer.clone());
        let external: Arc<dyn ExternalMessageSender> =
            Arc::new(NullExternalMessageSender { always_fail: external_fails });
        let push: Arc<dyn WebPushSender> = Arc::new(NullWebPushSender { outcome: Some(PushOutcome::Delivered) });
        let dispatcher = NotificationDispatcher::new(bus.clone(), external, push, store.clone(), audit, clock, offline_buffer);
        (dispatcher, bus, store)
    }

    #[tokio::test]
    async fn any_channel_succeeded_when_realtime_connected() {
        let (dispatcher, bus, _store) = dispatcher(false);
        let (conn_id, _rx) = bus.register();
        bus.authenticate(conn_id, "u1".to_string());

        let log = dispatcher
            .notify(&"u1".to_string(), &"q1".to_string(), NotificationKind::QueueNotification, TemplateData::default())
            .await;
        assert!(log.any_channel_succeeded());
        assert!(log.realtime_bus.sent);
    }

    #[tokio::test]
    async fn offline_realtime_buffers_but_other_channels_still_succeed() {
        let (dispatcher, _bus, _store) = dispatcher(false);
        let log = dispatcher
            .notify(&"u1".to_string(), &"q1".to_string(), NotificationKind::QueueNotification, TemplateData::default())
            .await;
        assert!(!log.realtime_bus.sent);
        assert!(log.external_msg.sent);
        assert!(log.any_channel_succeeded());
    }

    #[tokio::test]
    async fn scenario_6_circuit_trips_but_overall_notify_still_succeeds() {
        let (dispatcher, _bus, _store) = dispatcher(true);
        // trip the external breaker with 5 consecutive failures
        for _ in 0..5 {
            let _ = dispatcher
                .notify(&"u1".to_string(), &"q1".to_string(), NotificationKind::QueueNotification, TemplateData::default())
                .await;
        }
        assert_eq!(dispatcher.external_breaker.state(), crate::resilience::BreakerState::Open);

        let log = dispatcher
            .notify(&"u1".to_string(), &"q1".to_string(), NotificationKind::QueueNotification, TemplateData::default())
            .await;
        assert!(!log.external_msg.sent);
        assert_eq!(log.external_msg.error.as_deref(), Some("circuit open"));
        // realtime is buffered (offline) and push succeeds, so overall notify is a success
        assert!(log.any_channel_succeeded());
    }
}
