//! External messaging channel adapter. §4.E.
//!
//! A thin trait boundary keeps the HTTP-backed implementation and a test
//! double on equal footing, rather than baking a specific provider client
//! into call sites.

use async_trait::async_trait;

#[async_trait]
pub trait ExternalMessageSender: Send + Sync {
    async fn send(&self, phone: &str, body: &str) -> Result<bool, String>;
}

/// Formats a raw phone number to E.164, assuming a 10-digit national number
/// belongs to the configured default country code.
pub fn format_e164(raw: &str, default_country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if raw.trim_start().starts_with('+') {
        format!("+{digits}")
    } else if digits.len() == 10 {
        format!("+{default_country_code}{digits}")
    } else {
        format!("+{digits}")
    }
}

pub struct HttpExternalMessageSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    default_country_code: String,
}

impl HttpExternalMessageSender {
    pub fn new(api_url: String, api_key: String, default_country_code: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_url,
            api_key,
            default_country_code,
        }
    }
}

#[async_trait]
impl ExternalMessageSender for HttpExternalMessageSender {
    async fn send(&self, phone: &str, body: &str) -> Result<bool, String> {
        let to = format_e164(phone, &self.default_country_code);
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "to": to, "body": body }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().is_success())
    }
}

/// In-memory test double recording every send attempt.
#[derive(Default)]
pub struct NullExternalMessageSender {
    pub always_fail: bool,
}

#[async_trait]
impl ExternalMessageSender for NullExternalMessageSender {
    async fn send(&self, _phone: &str, _body: &str) -> Result<bool, String> {
        if self.always_fail {
            Err("simulated failure".to_string())
        } else {
            Ok(true)
        }
    }
}
