//! Observability metrics for task distribution and execution.
//!
//! Metrics are exported via the `metrics` crate facade; wire up an
//! exporter (e.g. Prometheus) in the binary if you want them scraped.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tessera_tasks_total` | Counter | `status` | Task outcomes |
//! | `tessera_task_duration_seconds` | Histogram | `status` | Task execution duration |
//! | `tessera_queue_depth` | Gauge | `queue`, `bucket` | Queue population by state |
//! | `tessera_lease_renewals_total` | Counter | - | Heartbeat renewals |
//! | `tessera_dead_letters_total` | Counter | - | Messages dead-lettered |
//! | `tessera_redriven_total` | Counter | - | Messages redriven |

use metrics::{counter, gauge, histogram};

use crate::queue::QueueDepth;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Task outcomes by status.
    pub const TASKS_TOTAL: &str = "tessera_tasks_total";
    /// Histogram: Task execution duration in seconds.
    pub const TASK_DURATION_SECONDS: &str = "tessera_task_duration_seconds";
    /// Gauge: Queue population by state.
    pub const QUEUE_DEPTH: &str = "tessera_queue_depth";
    /// Counter: Heartbeat lease renewals.
    pub const LEASE_RENEWALS_TOTAL: &str = "tessera_lease_renewals_total";
    /// Counter: Messages moved to the dead-letter queue.
    pub const DEAD_LETTERS_TOTAL: &str = "tessera_dead_letters_total";
    /// Counter: Messages redriven back to the main queue.
    pub const REDRIVEN_TOTAL: &str = "tessera_redriven_total";
}

/// High-level interface for recording worker metrics.
///
/// Cheap to clone and share across worker tasks.
#[derive(Debug, Clone, Default)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one task outcome and its duration.
    pub fn record_task(&self, status: &str, duration_secs: f64) {
        counter!(names::TASKS_TOTAL, "status" => status.to_string()).increment(1);
        histogram!(names::TASK_DURATION_SECONDS, "status" => status.to_string())
            .record(duration_secs);
    }

    /// Records a successful lease renewal.
    pub fn record_lease_renewal(&self) {
        counter!(names::LEASE_RENEWALS_TOTAL).increment(1);
    }

    /// Records a message moved to the dead-letter queue.
    pub fn record_dead_letter(&self) {
        counter!(names::DEAD_LETTERS_TOTAL).increment(1);
    }

    /// Records messages redriven to the main queue.
    pub fn record_redriven(&self, count: usize) {
        counter!(names::REDRIVEN_TOTAL).increment(count as u64);
    }

    /// Publishes the current queue population gauges.
    #[allow(clippy::cast_precision_loss)] // Queue depths are small
    pub fn set_queue_depth(&self, queue: &str, depth: QueueDepth) {
        for (bucket, value) in [
            ("ready", depth.ready),
            ("leased", depth.leased),
            ("dead", depth.dead),
        ] {
            gauge!(
                names::QUEUE_DEPTH,
                "queue" => queue.to_string(),
                "bucket" => bucket,
            )
            .set(value as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        let metrics = WorkerMetrics::new();
        metrics.record_task("completed", 1.5);
        metrics.record_lease_renewal();
        metrics.record_dead_letter();
        metrics.record_redriven(3);
        metrics.set_queue_depth(
            "test",
            QueueDepth {
                ready: 1,
                leased: 2,
                dead: 0,
            },
        );
    }
}
