//! HTTP server exposing Prometheus metrics and health.
//!
//! Hyper 1.x, one task per connection, stopped through a broadcast receiver.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::registry::GatewayMetrics;
use crate::health::{HealthCheck, HealthStatus};

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub bind_address: SocketAddr,
    /// Path for metrics endpoint (default: "/metrics").
    pub metrics_path: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_address(SocketAddr::from(([0, 0, 0, 0], 9090)))
    }
}

impl MetricsServerConfig {
    pub fn with_address(addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_address: addr.into(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

/// HTTP server for `/metrics` and `/health`.
pub struct MetricsServer {
    config: MetricsServerConfig,
    metrics: Arc<GatewayMetrics>,
    health: Option<Arc<HealthCheck>>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            config,
            metrics,
            health: None,
        }
    }

    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> crate::Result<()> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| {
                crate::Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to bind metrics server: {}", e),
                ))
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> crate::Result<()> {
        info!("Metrics server listening on http://{}", listener.local_addr()?);

        let state = Arc::new(ServerState {
            metrics: Arc::clone(&self.metrics),
            health: self.health.clone(),
            metrics_path: self.config.metrics_path.clone(),
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Connection from {}", addr);

                            let io = TokioIo::new(stream);
                            let state = Arc::clone(&state);

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move {
                                        Ok::<_, Infallible>(handle_request(req, &state))
                                    }
                                });

                                if let Err(err) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    // Clients hanging up mid-request is routine
                                    if !err.is_incomplete_message() {
                                        warn!("Error serving connection from {}: {}", addr, err);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Metrics server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

struct ServerState {
    metrics: Arc<GatewayMetrics>,
    health: Option<Arc<HealthCheck>>,
    metrics_path: String,
}

fn handle_request(req: Request<Incoming>, state: &ServerState) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return make_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method Not Allowed".to_string(),
        );
    }

    let path = req.uri().path();
    if path == state.metrics_path {
        make_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            state.metrics.encode(),
        )
    } else if path == "/health" || path == "/healthz" {
        handle_health_request(state)
    } else {
        make_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())
    }
}

fn handle_health_request(state: &ServerState) -> Response<Full<Bytes>> {
    let Some(health) = &state.health else {
        return make_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#.to_string(),
        );
    };

    let report = health.report();
    let code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    match serde_json::to_string(&report) {
        Ok(body) => make_response(code, "application/json", body),
        Err(e) => make_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("Failed to encode health report: {}", e),
        ),
    }
}

fn make_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
