// Execution metrics
//
// Counters, gauges and histograms for sandbox outcomes, admission control,
// queue depth and teardown. Exported in the Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::SandboxError;

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down, never below zero)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Bucket {
    le: f64, // upper bound in seconds
    count: AtomicU64,
}

/// Histogram for durations
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<Bucket>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for image builds and test runs (seconds to minutes)
    pub fn new_execution() -> Self {
        let bounds = [0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];
        Self {
            buckets: bounds
                .iter()
                .map(|&le| Bucket {
                    le,
                    count: AtomicU64::new(0),
                })
                .collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in self.buckets.iter().filter(|b| seconds <= b.le) {
            bucket.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            name,
            self.get_count()
        ));
        out.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!("{}_count {}\n", name, self.get_count()));
    }
}

/// Process-wide metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Submissions and admission control
    pub executions_submitted: Counter,
    pub executions_rejected: Counter,

    // Terminal outcomes
    pub executions_completed: Counter,
    pub executions_tests_failed: Counter,
    pub executions_failed: Counter,
    pub failures_validation: Counter,
    pub failures_infrastructure: Counter,
    pub failures_timeout: Counter,
    pub failures_cancelled: Counter,

    // Teardown
    pub cleanup_success: Counter,
    pub cleanup_failure: Counter,

    // Store writes swallowed after the initial create
    pub store_write_errors: Counter,

    // Contention and queueing
    pub active_executions: Gauge,
    pub queued_executions: Gauge,

    pub execution_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_submitted: Counter::new(),
            executions_rejected: Counter::new(),
            executions_completed: Counter::new(),
            executions_tests_failed: Counter::new(),
            executions_failed: Counter::new(),
            failures_validation: Counter::new(),
            failures_infrastructure: Counter::new(),
            failures_timeout: Counter::new(),
            failures_cancelled: Counter::new(),
            cleanup_success: Counter::new(),
            cleanup_failure: Counter::new(),
            store_write_errors: Counter::new(),
            active_executions: Gauge::new(),
            queued_executions: Gauge::new(),
            execution_duration: Histogram::new_execution(),
        }
    }

    /// A run reached `completed`; a non-zero exit code is still a completion
    pub fn record_completed(&self, exit_code: i32, duration: Duration) {
        self.executions_completed.inc();
        if exit_code != 0 {
            self.executions_tests_failed.inc();
        }
        self.execution_duration.observe(duration);
    }

    /// A run reached `failed`
    pub fn record_failure(&self, error: &SandboxError) {
        self.executions_failed.inc();
        match error {
            SandboxError::Validation(_) => self.failures_validation.inc(),
            SandboxError::Timeout { .. } => self.failures_timeout.inc(),
            SandboxError::Cancelled => self.failures_cancelled.inc(),
            SandboxError::Saturated { .. } => self.executions_rejected.inc(),
            _ => self.failures_infrastructure.inc(),
        }
    }

    pub fn record_cleanup(&self, success: bool) {
        if success {
            self.cleanup_success.inc();
        } else {
            self.cleanup_failure.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        counter(
            &mut out,
            "testbox_executions_submitted_total",
            "Execution requests accepted for processing",
            self.executions_submitted.get(),
        );
        counter(
            &mut out,
            "testbox_executions_rejected_total",
            "Execution requests rejected by admission control",
            self.executions_rejected.get(),
        );

        out.push_str("# HELP testbox_executions_total Executions by terminal status\n");
        out.push_str("# TYPE testbox_executions_total counter\n");
        out.push_str(&format!(
            "testbox_executions_total{{status=\"completed\"}} {}\n",
            self.executions_completed.get()
        ));
        out.push_str(&format!(
            "testbox_executions_total{{status=\"failed\"}} {}\n",
            self.executions_failed.get()
        ));

        counter(
            &mut out,
            "testbox_test_failures_total",
            "Completed executions with a non-zero exit code",
            self.executions_tests_failed.get(),
        );

        out.push_str("# HELP testbox_failures_total Failed executions by cause\n");
        out.push_str("# TYPE testbox_failures_total counter\n");
        for (cause, value) in [
            ("validation", self.failures_validation.get()),
            ("infrastructure", self.failures_infrastructure.get()),
            ("timeout", self.failures_timeout.get()),
            ("cancelled", self.failures_cancelled.get()),
        ] {
            out.push_str(&format!(
                "testbox_failures_total{{cause=\"{}\"}} {}\n",
                cause, value
            ));
        }

        out.push_str("# HELP testbox_cleanup_total Teardown outcomes\n");
        out.push_str("# TYPE testbox_cleanup_total counter\n");
        out.push_str(&format!(
            "testbox_cleanup_total{{outcome=\"success\"}} {}\n",
            self.cleanup_success.get()
        ));
        out.push_str(&format!(
            "testbox_cleanup_total{{outcome=\"failure\"}} {}\n",
            self.cleanup_failure.get()
        ));

        counter(
            &mut out,
            "testbox_store_write_errors_total",
            "Record store writes that failed after creation",
            self.store_write_errors.get(),
        );

        gauge(
            &mut out,
            "testbox_active_executions",
            "Sandboxes currently building or running",
            self.active_executions.get(),
        );
        gauge(
            &mut out,
            "testbox_queued_executions",
            "Requests waiting for a worker",
            self.queued_executions.get(),
        );

        self.execution_duration.export(
            "testbox_execution_duration_seconds",
            "Wall time from worker pickup to terminal state",
            &mut out,
        );

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n{} {}\n", name, help, name, name, value));
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {} {}\n# TYPE {} gauge\n{} {}\n", name, help, name, name, value));
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
