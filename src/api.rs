use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::Metrics;
use crate::ratelimit::{QuotaStatus, RateLimiter};
use crate::scheduler::cancelled;
use crate::stats::{Aggregator, Snapshot, StatsError};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub limiter: Arc<RateLimiter>,
}

/// Read-only view over the aggregator and the limiter, plus `/metrics`.
pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/stats", get(all_stats))
        .route("/stats/{channel}", get(channel_stats))
        .route("/quota", get(quota))
        .with_state(state)
        .merge(metrics.router())
}

async fn all_stats(State(state): State<AppState>) -> Result<Json<Snapshot>, StatusCode> {
    state.aggregator.snapshot(None).map(Json).map_err(|e| {
        tracing::error!(error = %e, "snapshot of all channels failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn channel_stats(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<Snapshot>, StatusCode> {
    match state.aggregator.snapshot(Some(&channel)) {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(StatsError::UnknownChannel(_)) => Err(StatusCode::NOT_FOUND),
    }
}

async fn quota(State(state): State<AppState>) -> Json<QuotaStatus> {
    Json(state.limiter.status())
}

/// Bind `addr` and serve `router` until shutdown is broadcast.
pub async fn spawn_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "stats api listening");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancelled(&mut shutdown).await })
            .await;
        if let Err(e) = served {
            tracing::error!(error = ?e, "stats api stopped with error");
        }
    }))
}
