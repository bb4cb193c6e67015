//! Observability
//!
//! Metrics for operational visibility. Logging goes through the `log` facade.

pub mod metrics;

pub use metrics::{get_metrics, MetricsRegistry};
