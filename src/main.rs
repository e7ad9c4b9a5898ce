use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use queue_coordinator::audit::AuditLog;
use queue_coordinator::boundary::auth::SessionStore;
use queue_coordinator::boundary::{handlers, RateLimiter};
use queue_coordinator::channels::external_msg::{ExternalMessageSender, HttpExternalMessageSender, NullExternalMessageSender};
use queue_coordinator::channels::realtime::RealtimeBus;
use queue_coordinator::channels::web_push::{HttpWebPushSender, NullWebPushSender, WebPushSender};
use queue_coordinator::clock::{SharedClock, SystemClock};
use queue_coordinator::config::Config;
use queue_coordinator::metrics::Metrics;
use queue_coordinator::notifier::NotificationDispatcher;
use queue_coordinator::reputation::ReputationStore;
use queue_coordinator::resilience::{run_offline_buffer_eviction, OfflineBuffer};
use queue_coordinator::service::QueueService;
use queue_coordinator::store::InMemoryStore;
use queue_coordinator::sweepers::{run_no_show_sweep, run_pending_verification_sweep};
use queue_coordinator::verification::VerificationEngine;
use queue_coordinator::AppState;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter.clone())
        .json()
        .init();
    info!("queue coordinator starting up");

    let clock: SharedClock = Arc::new(SystemClock);
    let store: queue_coordinator::store::SharedStore = Arc::new(InMemoryStore::new());
    let reputation = Arc::new(ReputationStore::new(clock.clone()));
    let audit = AuditLog::spawn(audit_log_path());
    let bus = Arc::new(RealtimeBus::new(clock.clone()));
    let offline_buffer = Arc::new(OfflineBuffer::new(clock.clone()));
    bus.set_offline_buffer(offline_buffer.clone());

    let external_sender: Arc<dyn ExternalMessageSender> = match (&config.external_msg_base_url, &config.external_msg_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpExternalMessageSender::new(url.clone(), key.clone(), "1".to_string())),
        _ => {
            info!("EXTERNAL_MSG_BASE_URL/EXTERNAL_MSG_API_KEY not set, external messaging disabled");
            Arc::new(NullExternalMessageSender { always_fail: true })
        }
    };
    let push_sender: Arc<dyn WebPushSender> = match (&config.vapid_public_key, &config.vapid_private_key) {
        (Some(public), Some(private)) => {
            Arc::new(HttpWebPushSender::new(public.clone(), private.clone(), "mailto:ops@queue-coordinator.invalid".to_string()))
        }
        _ => {
            info!("VAPID keys not set, web push disabled");
            Arc::new(NullWebPushSender { outcome: None })
        }
    };

    let notifier = NotificationDispatcher::new(
        bus.clone(),
        external_sender,
        push_sender,
        store.clone(),
        audit.clone(),
        clock.clone(),
        offline_buffer.clone(),
    );
    let verification = VerificationEngine::new(reputation.clone(), audit.clone(), store.clone());
    let service = Arc::new(QueueService::new(
        store.clone(),
        reputation.clone(),
        audit.clone(),
        verification,
        notifier,
        bus.clone(),
        clock.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        service: service.clone(),
        reputation: reputation.clone(),
        audit: audit.clone(),
        bus: bus.clone(),
        sessions: Arc::new(SessionStore::new()),
        metrics: Arc::new(Metrics::new()),
        rate_limit_api: Arc::new(RateLimiter::general_api(clock.clone())),
        rate_limit_notify: Arc::new(RateLimiter::notify(clock.clone())),
        rate_limit_checkin: Arc::new(RateLimiter::check_in(clock.clone())),
        clock: clock.clone(),
    };

    tokio::spawn(run_no_show_sweep(store.clone(), service.clone(), clock.clone()));
    tokio::spawn(run_pending_verification_sweep(store.clone(), audit.clone(), clock.clone()));
    tokio::spawn(run_offline_buffer_eviction(offline_buffer));

    let app = Router::new()
        .route("/queues", post(handlers::enrol))
        .route("/venues/:venue_id/queue", get(handlers::list_venue_queue))
        .route("/queues/:queue_id", delete(handlers::cancel))
        .route("/queues/:queue_id/notify", post(handlers::notify))
        .route("/queues/:queue_id/checkin", post(handlers::check_in))
        .route("/queues/:queue_id/verify-arrival", post(handlers::verify_arrival))
        .route("/queues/:queue_id/status", put(handlers::update_status))
        .route("/venues/:venue_id/pending-verifications", get(handlers::pending_verifications))
        .route("/users/:user_id/reputation", get(handlers::reputation))
        .route("/users/:user_id/checkin-history", get(handlers::checkin_history))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(handlers::ws_upgrade))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("[error] could not bind port {}: {e}", config.port);
        eprintln!("hint: another instance may already be running; set PORT to use a different one");
        std::process::exit(1);
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("[error] server error: {e}");
            std::process::exit(1);
        });
}

fn audit_log_path() -> std::path::PathBuf {
    std::env::var("AUDIT_LOG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("queue-coordinator-audit.ndjson"))
}
