// src/api/mod.rs

//! HTTP control API.
//!
//! - [`control`] holds the operations as plain methods on [`ControlApi`].
//! - [`handlers`] adapts them to axum.
//! - [`error`] maps failures to JSON error bodies.

use std::future::Future;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod control;
pub mod error;
pub mod handlers;

pub use control::{
    ControlApi, DEFAULT_HISTORY_LIMIT, HealthReport, RestartReport, StageStatus, StatusReport,
};
pub use error::{ApiError, ApiResult};

/// Build the control API router.
pub fn router(control: ControlApi) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/trigger/{stage_id}", post(handlers::trigger))
        .route("/history", get(handlers::history))
        .route("/restart", post(handlers::restart))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

/// Serve the control API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, control: ControlApi, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "control API listening");
    }
    axum::serve(listener, router(control))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
