//! HTTP surface: health/readiness/status/metrics endpoints (Axum).

pub mod app;
pub mod routes;

pub use app::{AppState, Metrics};
