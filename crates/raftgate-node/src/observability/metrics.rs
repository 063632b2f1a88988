//! Prometheus metrics collection.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels of the request counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// `read` or `write`.
    pub operation: String,
    /// Terminal outcome, see [`Outcome`].
    pub outcome: String,
}

/// Labels of the latency histogram.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// `read` or `write`.
    pub operation: String,
}

/// Terminal outcome of a gateway call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Invalid,
    Timeout,
    Unavailable,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Invalid => "invalid",
            Outcome::Timeout => "timeout",
            Outcome::Unavailable => "unavailable",
            Outcome::Error => "error",
        }
    }
}

/// Global metrics state.
pub static METRICS: Lazy<MetricsState> = Lazy::new(MetricsState::new);

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// Gateway calls by operation and outcome.
    pub requests_total: Family<RequestLabels, Counter>,
    /// Gateway call duration histogram (seconds).
    pub request_duration_seconds: Family<OperationLabels, Histogram>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "raftgate_requests",
            "Gateway calls by operation and outcome",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<OperationLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.0, 16))
            });
        registry.register(
            "raftgate_request_duration_seconds",
            "Gateway call duration in seconds",
            request_duration_seconds.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            requests_total,
            request_duration_seconds,
        }
    }

    /// Records one finished gateway call.
    pub fn record_request(&self, operation: &str, outcome: Outcome, duration: Duration) {
        self.requests_total
            .get_or_create(&RequestLabels {
                operation: operation.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .inc();
        self.request_duration_seconds
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    /// Number of calls recorded for `operation` with `outcome`.
    pub fn requests(&self, operation: &str, outcome: Outcome) -> u64 {
        self.requests_total
            .get_or_create(&RequestLabels {
                operation: operation.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .get()
    }

    /// Encode metrics in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// `GET /metrics` handler.
pub async fn metrics_handler() -> Response {
    match METRICS.encode() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
