use std::{net::SocketAddr, sync::Arc};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use reel_prometheus::PrometheusMetrics;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<Arc<PrometheusMetrics>>) -> Result<String, StatusCode> {
    metrics.encode_text().map_err(|e| {
        warn!(error = %e, "metrics encoding failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Serve `/metrics` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<PrometheusMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "metrics endpoint listening");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
