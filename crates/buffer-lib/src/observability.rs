//! Observability infrastructure for the buffer agent
//!
//! Provides:
//! - Prometheus metrics (reconcile latency, outcomes, conflicts, buffer size)
//! - Structured JSON logging with tracing

use crate::error::ReconcileError;
use crate::reconciler::{BufferReport, Convergence};
use crate::sizing::BufferSize;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for a full reconciliation pass (in seconds)
const RECONCILE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BufferMetricsInner> = OnceLock::new();

struct BufferMetricsInner {
    reconcile_latency_seconds: Histogram,
    reconciliations: IntCounterVec,
    conflict_retries: IntCounter,
    object_writes: IntCounterVec,
    buffer_size_gibibytes: IntGauge,
}

impl BufferMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram!(
                "autoscaling_buffer_reconcile_latency_seconds",
                "Time spent on one full reconciliation pass",
                RECONCILE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            reconciliations: register_int_counter_vec!(
                "autoscaling_buffer_reconciliations_total",
                "Reconciliation passes by result",
                &["result"]
            )
            .expect("Failed to register reconciliations_total"),

            conflict_retries: register_int_counter!(
                "autoscaling_buffer_conflict_retries_total",
                "Writes rejected because the object changed since it was read"
            )
            .expect("Failed to register conflict_retries_total"),

            object_writes: register_int_counter_vec!(
                "autoscaling_buffer_object_writes_total",
                "Convergence outcomes per object kind",
                &["kind", "action"]
            )
            .expect("Failed to register object_writes_total"),

            buffer_size_gibibytes: register_int_gauge!(
                "autoscaling_buffer_size_gibibytes",
                "Memory requested by the buffer deployment"
            )
            .expect("Failed to register buffer_size_gibibytes"),
        }
    }
}

/// Reconciler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct BufferMetrics {
    inner: &'static BufferMetricsInner,
}

impl Default for BufferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(BufferMetricsInner::new),
        }
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner.reconcile_latency_seconds.observe(duration_secs);
    }

    /// Record a successful pass
    pub fn record_report(&self, report: &BufferReport) {
        let result = if report.wrote() { "changed" } else { "unchanged" };
        self.inner.reconciliations.with_label_values(&[result]).inc();
        self.inner
            .conflict_retries
            .inc_by(u64::from(report.conflicts()));

        self.record_convergence("PriorityClass", report.priority_class);
        self.record_convergence("Deployment", report.deployment);
        self.inner.buffer_size_gibibytes.set(report.size.size_gi);
    }

    fn record_convergence(&self, kind: &str, outcome: Convergence) {
        self.inner
            .object_writes
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
    }

    /// Record a failed pass
    pub fn record_failure(&self, err: &ReconcileError) {
        let result = if err.is_sizing() {
            "sizing_failed"
        } else if err.is_cancelled() {
            "cancelled"
        } else {
            "failed"
        };
        self.inner.reconciliations.with_label_values(&[result]).inc();
    }

    pub fn reconciliations(&self, result: &str) -> u64 {
        self.inner.reconciliations.with_label_values(&[result]).get()
    }

    pub fn buffer_size_gi(&self) -> i64 {
        self.inner.buffer_size_gibibytes.get()
    }
}

/// Structured logger for reconciliation events
///
/// Every event carries the namespace the buffer deployment lives in.
#[derive(Clone)]
pub struct ReconcileLogger {
    namespace: String,
}

impl ReconcileLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, interval_secs: u64) {
        info!(
            event = "agent_started",
            namespace = %self.namespace,
            agent_version = %version,
            reconcile_interval_secs = interval_secs,
            "Buffer agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Buffer agent shutting down"
        );
    }

    pub fn log_buffer_sized(&self, size: &BufferSize) {
        info!(
            event = "buffer_sized",
            namespace = %self.namespace,
            node = %size.node,
            allocatable_gi = size.allocatable_gi,
            size_gi = size.size_gi,
            "Sized buffer from worker node"
        );
    }

    /// Log the outcome for one object, skipping objects that were untouched
    pub fn log_object_converged(&self, kind: &str, outcome: Convergence) {
        match outcome {
            Convergence::Unchanged => {}
            Convergence::Abandoned { attempts } => {
                warn!(
                    event = "object_converged",
                    namespace = %self.namespace,
                    kind = %kind,
                    outcome = %outcome,
                    attempts = attempts,
                    "Gave up on object after repeated conflicts, retrying next pass"
                );
            }
            _ => {
                info!(
                    event = "object_converged",
                    namespace = %self.namespace,
                    kind = %kind,
                    outcome = %outcome,
                    conflicts = outcome.conflicts(),
                    "Converged buffer object"
                );
            }
        }
    }

    pub fn log_report(&self, report: &BufferReport, elapsed_secs: f64) {
        self.log_buffer_sized(&report.size);
        self.log_object_converged("PriorityClass", report.priority_class);
        self.log_object_converged("Deployment", report.deployment);
        info!(
            event = "reconcile_completed",
            namespace = %self.namespace,
            wrote = report.wrote(),
            elapsed_secs = elapsed_secs,
            "Reconciliation pass completed"
        );
    }

    pub fn log_reconcile_failed(&self, err: &ReconcileError, consecutive_failures: u32) {
        warn!(
            event = "reconcile_failed",
            namespace = %self.namespace,
            error = %err,
            sizing = err.is_sizing(),
            consecutive_failures = consecutive_failures,
            "Reconciliation pass failed"
        );
    }
}
