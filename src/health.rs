//! HTTP health endpoint.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::DetachedJobSupervisor;
use crate::{AppError, Result};

/// Body returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Number of background jobs still running.
    pub active_background_jobs: usize,
}

/// Snapshot the process health.
#[must_use]
pub fn health_report(supervisor: &DetachedJobSupervisor) -> HealthReport {
    HealthReport {
        status: "ok",
        active_background_jobs: supervisor.active_count(),
    }
}

async fn health(State(supervisor): State<DetachedJobSupervisor>) -> Json<HealthReport> {
    Json(health_report(&supervisor))
}

/// Build the health router.
pub fn router(supervisor: DetachedJobSupervisor) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(supervisor)
}

/// Serve `GET /health` on localhost until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound.
pub async fn serve_health(
    port: u16,
    supervisor: DetachedJobSupervisor,
    ct: CancellationToken,
) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind health on {bind}: {err}")))?;

    info!(%bind, "starting health endpoint");

    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("health server error: {err}")))?;

    info!("health endpoint shut down");
    Ok(())
}
