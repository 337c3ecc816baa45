// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::core::state::NodeState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// It updates dynamic gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(state: Arc<NodeState>) -> impl IntoResponse {
    if let Some(sequence) = state.topology.sequence() {
        crate::core::metrics::TOPOLOGY_SEQUENCE.set(f64::from(sequence));
    }
    if let Ok(env) = state.env() {
        crate::core::metrics::OWNED_PARTITIONS.set(env.owned_partitions().len() as f64);
    }

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<NodeState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = {
        let config = state.config.lock().await;
        config.metrics.port
    };

    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
    {
        error!("Metrics server terminated with an error: {e}");
    }
}
