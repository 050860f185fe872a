//! Prometheus scrape endpoint
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// `/metrics` and `/healthz` over `registry`
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry)
}

async fn metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    let content_type = encoder.format_type().to_string();
    ([(axum::http::header::CONTENT_TYPE, content_type)], buffer).into_response()
}

/// Serve [`router`] on `addr` until `shutdown` is cancelled
///
/// # Errors
///
/// Fails if `addr` cannot be bound or the server stops unexpectedly.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    info!(%addr, "serving metrics");
    serve_on(listener, registry, shutdown).await
}

/// Like [`serve`], on an already bound listener
///
/// # Errors
///
/// Fails if the server stops unexpectedly.
pub async fn serve_on(
    listener: TcpListener,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(Error::Serve)
}
