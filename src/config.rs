//! Environment-driven bootstrap configuration. §4.M, ambient.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub log_filter: String,
    pub external_msg_base_url: Option<String>,
    pub external_msg_api_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "queue_coordinator=info,tower_http=info".into()),
            external_msg_base_url: env::var("EXTERNAL_MSG_BASE_URL").ok(),
            external_msg_api_key: env::var("EXTERNAL_MSG_API_KEY").ok(),
            vapid_public_key: env::var("VAPID_PUBLIC_KEY").ok(),
            vapid_private_key: env::var("VAPID_PRIVATE_KEY").ok(),
            database_url: env::var("DATABASE_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_absent() {
        env::remove_var("PORT");
        env::remove_var("RUST_LOG");
        let cfg = Config::from_env();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.log_filter, "queue_coordinator=info,tower_http=info");
    }
}
