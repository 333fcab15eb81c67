//! `/health`, `/ready`, `/status`, and `/metrics` (C12).

use std::sync::atomic::Ordering;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    connection_pool: ConnectionPoolHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    max_connections: u32,
}

async fn check_database(state: &AppState) -> DatabaseHealth {
    match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(state.central.pool()),
    )
    .await
    {
        Ok(Ok(_)) => DatabaseHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            error: Some(format!("query failed: {e}")),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            error: Some("query timeout (>5s)".to_string()),
        },
    }
}

/// Liveness: is the process up at all. Never touches the database.
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness: can the process actually serve traffic (database reachable).
pub async fn ready_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = check_database(&state).await;
    let pool_options = state.central.pool().options();
    let connection_pool = ConnectionPoolHealth {
        size: state.central.pool().size(),
        idle_connections: state.central.pool().num_idle(),
        max_connections: pool_options.get_max_connections(),
    };

    let healthy = database.status == "ok";
    let status = if healthy { "healthy" } else { "unhealthy" };
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database,
            connection_pool,
        }),
    )
}

#[derive(Serialize)]
pub struct StatusResponse {
    jobs_claimed: usize,
    jobs_completed: usize,
    jobs_failed: usize,
    jobs_deferred: usize,
    queue_items_sent: usize,
    queue_items_failed: usize,
}

/// A human-oriented snapshot of the counters also exposed at `/metrics`.
pub async fn status_handler(Extension(state): Extension<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        jobs_claimed: state.metrics.jobs_claimed.load(Ordering::Relaxed),
        jobs_completed: state.metrics.jobs_completed.load(Ordering::Relaxed),
        jobs_failed: state.metrics.jobs_failed.load(Ordering::Relaxed),
        jobs_deferred: state.metrics.jobs_deferred.load(Ordering::Relaxed),
        queue_items_sent: state.metrics.queue_items_sent.load(Ordering::Relaxed),
        queue_items_failed: state.metrics.queue_items_failed.load(Ordering::Relaxed),
    })
}

/// Prometheus text exposition format.
pub async fn metrics_handler(Extension(state): Extension<AppState>) -> String {
    let m = &state.metrics;
    format!(
        "# TYPE jobs_claimed_total counter\n\
         jobs_claimed_total {}\n\
         # TYPE jobs_completed_total counter\n\
         jobs_completed_total {}\n\
         # TYPE jobs_failed_total counter\n\
         jobs_failed_total {}\n\
         # TYPE jobs_deferred_total counter\n\
         jobs_deferred_total {}\n\
         # TYPE queue_items_sent_total counter\n\
         queue_items_sent_total {}\n\
         # TYPE queue_items_failed_total counter\n\
         queue_items_failed_total {}\n",
        m.jobs_claimed.load(Ordering::Relaxed),
        m.jobs_completed.load(Ordering::Relaxed),
        m.jobs_failed.load(Ordering::Relaxed),
        m.jobs_deferred.load(Ordering::Relaxed),
        m.queue_items_sent.load(Ordering::Relaxed),
        m.queue_items_failed.load(Ordering::Relaxed),
    )
}
