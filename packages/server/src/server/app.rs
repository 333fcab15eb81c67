//! Router assembly and shared application state.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::central_store::CentralStore;

/// Counters surfaced on `/metrics`, updated by the job processor, queue
/// dispatcher, and scheduler as they run. Plain `AtomicUsize`s rather than a
/// metrics crate — this system exposes only a handful of counters, so the
/// dependency isn't worth it.
#[derive(Default)]
pub struct Metrics {
    pub jobs_claimed: AtomicUsize,
    pub jobs_completed: AtomicUsize,
    pub jobs_failed: AtomicUsize,
    pub jobs_deferred: AtomicUsize,
    pub queue_items_sent: AtomicUsize,
    pub queue_items_failed: AtomicUsize,
}

#[derive(Clone)]
pub struct AppState {
    pub central: CentralStore,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(crate::server::routes::health::health_handler))
        .route("/ready", get(crate::server::routes::health::ready_handler))
        .route("/status", get(crate::server::routes::health::status_handler))
        .route("/metrics", get(crate::server::routes::health::metrics_handler))
        .layer(axum::extract::Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
}
