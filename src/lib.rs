//! Location-verified walk-in queue coordinator. See `SPEC_FULL.md` for the
//! full component breakdown; each module's doc comment cites its section.

pub mod audit;
pub mod boundary;
pub mod channels;
pub mod clock;
pub mod config;
pub mod errors;
pub mod geo;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod position;
pub mod reputation;
pub mod resilience;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod sweepers;
pub mod verification;

use std::sync::Arc;

use axum::extract::FromRef;

use crate::audit::AuditLog;
use crate::boundary::{SharedRateLimiter, SharedSessionStore};
use crate::channels::realtime::SharedRealtimeBus;
use crate::clock::SharedClock;
use crate::metrics::Metrics;
use crate::reputation::SharedReputationStore;
use crate::service::QueueService;
use crate::store::SharedStore;

/// Everything a handler needs, threaded through Axum's `State` extractor.
/// Cloning is cheap: every field is already an `Arc` (or a small value type).
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub service: Arc<QueueService>,
    pub reputation: SharedReputationStore,
    pub audit: Arc<AuditLog>,
    pub bus: SharedRealtimeBus,
    pub sessions: SharedSessionStore,
    pub metrics: Arc<Metrics>,
    pub rate_limit_api: SharedRateLimiter,
    pub rate_limit_notify: SharedRateLimiter,
    pub rate_limit_checkin: SharedRateLimiter,
    pub clock: SharedClock,
}

impl FromRef<AppState> for SharedSessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}
