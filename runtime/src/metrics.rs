//! Prometheus metrics for RPC clients and servers.
//!
//! This module provides metric collection for:
//! - Client calls (count, outcome, latency, timeouts)
//! - Server requests (count, errors, handling latency)
//! - Supervisor reconnections
//!
//! Recording is always on; without an installed recorder the macros are
//! no-ops. Binaries install the exporter when `METRICS_ADDR` is set.
//!
//! # Example
//!
//! ```rust,no_run
//! use broker_rpc_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use broker_rpc_core::error::RpcError;
use broker_rpc_core::topology::RoutingKey;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime; the HTTP listener runs as
    /// a spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or a different recorder is
    /// already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Client Metrics
    describe_counter!(
        "rpc_client_calls_total",
        "Total number of remote calls, by routing key and outcome"
    );
    describe_counter!(
        "rpc_client_timeouts_total",
        "Total number of remote calls that received no reply in time"
    );
    describe_histogram!(
        "rpc_client_call_duration_seconds",
        "Time from connecting to receiving the matching reply"
    );

    // Server Metrics
    describe_counter!(
        "rpc_server_requests_total",
        "Total number of requests handled, by routing key and status"
    );
    describe_counter!(
        "rpc_server_errors_total",
        "Total number of requests answered with an ERROR envelope"
    );
    describe_histogram!(
        "rpc_server_handle_duration_seconds",
        "Time spent in the handler for one request"
    );

    // Supervisor Metrics
    describe_counter!(
        "rpc_server_reconnects_total",
        "Total number of sessions torn down and scheduled for reconnection"
    );
}

/// Client metrics recorder.
pub struct ClientMetrics;

impl ClientMetrics {
    /// Record a finished call.
    pub fn record_call<T>(key: RoutingKey, outcome: &Result<T, RpcError>, duration: Duration) {
        let outcome_label = match outcome {
            Ok(_) => "ok",
            Err(error) => error.kind(),
        };
        counter!("rpc_client_calls_total", "routing_key" => key.as_str(), "outcome" => outcome_label)
            .increment(1);
        histogram!("rpc_client_call_duration_seconds", "routing_key" => key.as_str())
            .record(duration.as_secs_f64());
        if matches!(outcome, Err(RpcError::Timeout(_))) {
            counter!("rpc_client_timeouts_total", "routing_key" => key.as_str()).increment(1);
        }
    }
}

/// Server metrics recorder.
pub struct ServerMetrics;

impl ServerMetrics {
    /// Record a handled request.
    pub fn record_request(routing_key: &str, ok: bool, duration: Duration) {
        let status = if ok { "OK" } else { "ERROR" };
        counter!("rpc_server_requests_total", "routing_key" => routing_key.to_string(), "status" => status)
            .increment(1);
        histogram!("rpc_server_handle_duration_seconds").record(duration.as_secs_f64());
        if !ok {
            counter!("rpc_server_errors_total").increment(1);
        }
    }

    /// Record a session torn down for reconnection.
    pub fn record_reconnect(service: &str) {
        counter!("rpc_server_reconnects_total", "service" => service.to_string()).increment(1);
    }
}
