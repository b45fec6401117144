//! Prometheus metrics for the sidecar
//!
//! Gauges:
//! - `lanxi_alive{device_id, location}` - 1 when the module answers ping
//! - `lanxi_amplitude_min{device_id, location, channel}` - scaled per-cycle minimum
//! - `lanxi_amplitude_max{device_id, location, channel}` - scaled per-cycle maximum
//!
//! Served over plain HTTP at `/metrics`, with `/health` for probes.

use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use lanxi_stream::{GaugeLabels, MetricsSink, AMPLITUDE_MAX, AMPLITUDE_MIN};
use prometheus::{
    register_gauge_vec_with_registry, Encoder, GaugeVec, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const NAMESPACE: &str = "lanxi";

/// Sidecar gauges registered in a caller-owned registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    alive: GaugeVec,
    amplitude_min: GaugeVec,
    amplitude_max: GaugeVec,
}

impl PrometheusMetrics {
    /// Register all gauges with `registry`
    pub fn with_registry(registry: &Registry) -> prometheus::Result<Self> {
        let alive = register_gauge_vec_with_registry!(
            Opts::new("alive", "Whether the LAN-XI module answers ping (1 = up)")
                .namespace(NAMESPACE),
            &["device_id", "location"],
            registry
        )?;

        let amplitude_min = register_gauge_vec_with_registry!(
            Opts::new(AMPLITUDE_MIN, "Minimum scaled amplitude over the last flush period")
                .namespace(NAMESPACE),
            &["device_id", "location", "channel"],
            registry
        )?;

        let amplitude_max = register_gauge_vec_with_registry!(
            Opts::new(AMPLITUDE_MAX, "Maximum scaled amplitude over the last flush period")
                .namespace(NAMESPACE),
            &["device_id", "location", "channel"],
            registry
        )?;

        Ok(Self {
            alive,
            amplitude_min,
            amplitude_max,
        })
    }

    /// Record the liveness probe result
    pub fn set_alive(&self, device_id: &str, location: &str, alive: bool) {
        self.alive
            .with_label_values(&[device_id, location])
            .set(if alive { 1.0 } else { 0.0 });
    }
}

impl MetricsSink for PrometheusMetrics {
    fn set_gauge(&self, name: &str, labels: &GaugeLabels, value: f64) {
        let gauge = match name {
            AMPLITUDE_MIN => &self.amplitude_min,
            AMPLITUDE_MAX => &self.amplitude_max,
            other => {
                log::warn!("Ignoring update for unregistered gauge {}", other);
                return;
            }
        };

        gauge
            .with_label_values(&[
                labels.device_id.as_str(),
                labels.location.as_str(),
                labels.channel.as_str(),
            ])
            .set(value);
    }
}

/// Running scrape endpoint
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MetricsServer {
    /// Bind `addr` and serve `registry` in the background
    pub fn start(addr: SocketAddr, registry: Registry) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let make_service = make_service_fn(move |_conn| {
            let registry = registry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, registry.clone())
                }))
            }
        });

        let builder = Server::try_bind(&addr)
            .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
        let server = builder.serve(make_service);
        let addr = server.local_addr();

        let server = server.with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        log::info!("Serving metrics at http://{}/metrics", addr);

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                log::error!("Metrics server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            log::error!("Metrics server task failed: {}", e);
        }
        log::info!("Metrics server stopped");
    }
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();

            match encoder.encode(&registry.gather(), &mut buffer) {
                Ok(()) => {
                    let mut response = respond(StatusCode::OK, buffer);
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                    response
                }
                Err(e) => {
                    log::error!("Failed to encode metrics: {}", e);
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to encode metrics: {}", e),
                    )
                }
            }
        }
        (&Method::GET, "/health") => respond(StatusCode::OK, "OK"),
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}
