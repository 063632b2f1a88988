//! # Observability Module
//!
//! Logging, metrics and request tracing for a raftgate node:
//!
//! - **Structured Logging**: pretty or JSON logs filtered by `RUST_LOG`
//! - **Prometheus Metrics**: gateway request counts and latencies
//! - **Request Tracing**: an `x-request-id` on every request and response
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raftgate_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Json)?;
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::{metrics_handler, MetricsState, Outcome, METRICS};
pub use middleware::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
