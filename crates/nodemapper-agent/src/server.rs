//! HTTP endpoints served next to the event loop: Prometheus `/metrics` and
//! a `/healthz` liveness check that relays the mapper's health query.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use nodemapper_common::error::{MapperError, Result};

use crate::metrics::ReportMetrics;
use crate::report::MapperClient;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Router exposing `GET /metrics`.
#[must_use]
pub fn metrics_router(metrics: Arc<ReportMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Router exposing `GET /healthz`.
#[must_use]
pub fn health_router(mapper: MapperClient) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .with_state(mapper)
}

/// Binds `port` on every IPv4 interface.
///
/// # Errors
///
/// Returns `MapperError::Server` if the port cannot be bound.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| server_err(&addr.to_string(), &e))
}

/// Serves `router` on `listener` until `token` is cancelled.
///
/// # Errors
///
/// Returns `MapperError::Server` if the accept loop fails.
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> Result<()> {
    let address = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
    tracing::info!(%address, "HTTP endpoint listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| server_err(&address, &e))
}

async fn metrics_handler(State(metrics): State<Arc<ReportMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(mapper): State<MapperClient>) -> (StatusCode, String) {
    match mapper.health().await {
        Ok(()) => (StatusCode::OK, "ok".into()),
        Err(e) => {
            tracing::warn!(url = %mapper.url(), error = %e, "mapper health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

fn server_err(address: &str, e: &std::io::Error) -> MapperError {
    MapperError::Server {
        address: address.to_string(),
        message: e.to_string(),
    }
}
