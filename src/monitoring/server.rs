//! Metrics & Health HTTP Server
//!
//! Serves `/metrics` (Prometheus text format) and `/healthz` (JSON
//! [`HealthReport`], `503` when critical) over HTTP/1.
//!
//! [`HealthReport`]: super::HealthReport

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::exporter::PrometheusExporter;
use super::health::{CacheHealthMonitor, HealthStatus};
use crate::error::Result;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct ServerState {
    exporter: Arc<PrometheusExporter>,
    monitor: Arc<CacheHealthMonitor>,
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn handle(state: &ServerState, req: &Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => {
            let report = state.monitor.get_last_report();
            state
                .exporter
                .update(state.monitor.backend(), report.as_ref());
            match state.exporter.render() {
                Ok(text) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, text),
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "error")
                }
            }
        }
        "/healthz" => {
            let report = state.monitor.check_health();
            let status = if report.status == HealthStatus::Critical {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            match serde_json::to_vec(&report) {
                Ok(body) => respond(status, "application/json", body),
                Err(e) => {
                    error!("Failed to serialize health report: {}", e);
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "error")
                }
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

/// Bind `addr` and serve until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    exporter: Arc<PrometheusExporter>,
    monitor: Arc<CacheHealthMonitor>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, exporter, monitor, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` is cancelled
pub async fn serve_listener(
    listener: TcpListener,
    exporter: Arc<PrometheusExporter>,
    monitor: Arc<CacheHealthMonitor>,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = ServerState { exporter, monitor };
    info!("Metrics server listening on {}", listener.local_addr()?);

    let listener = Arc::new(listener);
    let accept = move || {
        let listener = Arc::clone(&listener);
        async move { listener.accept().await }
    };
    accept_loop(accept, state, shutdown).await
}

/// Serve connections from `accept`; failed accepts are logged and retried
async fn accept_loop<A, F>(
    mut accept: A,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<()>
where
    A: FnMut() -> F,
    F: Future<Output = std::io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Metrics server stopped");
                return Ok(());
            }
            accepted = accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Metrics server accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        debug!("Metrics connection from {}", peer);

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handle(&state, &req);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
