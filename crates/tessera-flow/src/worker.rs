//! The task execution engine.
//!
//! One worker instance pulls one task at a time and drives it through the
//! execution state machine:
//!
//! ```text
//! ┌──────┐ receive ┌────────┐ immediately ┌───────────┐
//! │ IDLE │────────►│ LEASED │────────────►│ EXECUTING │
//! └──────┘         └────────┘             └───────────┘
//!     ▲                 │                       │
//!     │           heartbeat task          ┌─────┼──────────────┐
//!     │           renews the lease        │     │              │
//!     │           (RENEWING) while        ▼     ▼              ▼
//!     │           execution runs   ┌───────────┐ ┌────────┐ ┌─────────┐
//!     │                            │ COMPLETED │ │ FAILED │ │ ABORTED │
//!     │                            └───────────┘ └────────┘ └─────────┘
//!     │                                  ack      fail/bury   lease
//!     └──────────────────────────────────────────────────────expires──┘
//! ```
//!
//! The heartbeat keeps the renewal interval `renew_safety_margin` ahead
//! of lease expiry, so a long-running reduction never becomes visible to
//! a second worker mid-processing. Exceeding `max_processing_time`
//! aborts the task cooperatively: the engine neither acks nor fails the
//! message and lets the lease expire naturally: an operational anomaly
//! to investigate, not a normal retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use ulid::Ulid;

use tessera_core::catalog::TaskCatalog;
use tessera_core::dataset::TaskRecord;
use tessera_core::task_key::TaskKey;

use crate::config::WorkerConfig;
use crate::dispatch::{DispatchedTask, Dispatcher};
use crate::error::Error;
use crate::metrics::WorkerMetrics;
use crate::plugin::{OutputWriter, PluginContext, ReductionPlugin};
use crate::queue::to_chrono;

/// Terminal status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Reduction and output write succeeded.
    Completed,
    /// Reduction or write failed; the message was requeued or buried.
    Failed,
    /// Processing exceeded `max_processing_time` and was cancelled.
    Aborted,
}

impl TaskStatus {
    /// Stable lowercase name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-task outcome reported to the orchestrator.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The task that ran.
    pub key: TaskKey,
    /// Terminal status.
    pub status: TaskStatus,
    /// Wall-clock processing time.
    pub elapsed: Duration,
    /// Output locations written (empty unless completed).
    pub outputs: Vec<String>,
    /// Failure description, if any.
    pub error: Option<String>,
}

impl RunResult {
    /// Returns true if the task completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Completed)
    }
}

/// Internal execution outcome, keeping the typed error for the retry
/// decision before it degrades to a string in [`RunResult`].
enum ExecOutcome {
    Completed { outputs: Vec<String> },
    Failed { error: Error },
    Aborted,
}

/// One worker instance: pulls a task, runs the reduction, writes output,
/// and settles the queue message.
pub struct Worker {
    id: String,
    catalog: Arc<TaskCatalog>,
    plugin: Arc<dyn ReductionPlugin>,
    writer: Arc<dyn OutputWriter>,
    config: WorkerConfig,
    metrics: WorkerMetrics,
}

impl Worker {
    /// Creates a worker over shared read-only state.
    #[must_use]
    pub fn new(
        catalog: Arc<TaskCatalog>,
        plugin: Arc<dyn ReductionPlugin>,
        writer: Arc<dyn OutputWriter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: format!("worker-{}", Ulid::new()),
            catalog,
            plugin,
            writer,
            config,
            metrics: WorkerMetrics::new(),
        }
    }

    /// Returns this worker's instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the catalog this worker executes from.
    #[must_use]
    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    fn plugin_context(&self) -> PluginContext {
        PluginContext {
            config: self.config.plugin_config.clone(),
            deadline: Some(chrono::Utc::now() + to_chrono(self.config.max_processing_time)),
            threads: self.config.threads,
            memory_limit_bytes: self.config.memory_limit_bytes,
        }
    }

    /// Runs the reduction and output write under the processing-time
    /// ceiling.
    async fn run_reduction(&self, record: &TaskRecord) -> (ExecOutcome, Duration) {
        let context = self.plugin_context();
        let started = Instant::now();
        let work = async {
            let reduction = self
                .plugin
                .reduce(record, &context)
                .await
                .map_err(Error::from)?;
            self.writer.write(&record.key, &reduction).await
        };
        let outcome = match tokio::time::timeout(self.config.max_processing_time, work).await {
            Ok(Ok(outputs)) => ExecOutcome::Completed { outputs },
            Ok(Err(error)) => ExecOutcome::Failed { error },
            Err(_overrun) => ExecOutcome::Aborted,
        };
        (outcome, started.elapsed())
    }

    /// Converts an outcome into the reported result, logging and
    /// recording metrics once.
    fn finish(&self, key: &TaskKey, outcome: &ExecOutcome, elapsed: Duration) -> RunResult {
        let result = match outcome {
            ExecOutcome::Completed { outputs } => {
                info!(
                    worker = %self.id,
                    task = %key,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "task completed"
                );
                RunResult {
                    key: key.clone(),
                    status: TaskStatus::Completed,
                    elapsed,
                    outputs: outputs.clone(),
                    error: None,
                }
            }
            ExecOutcome::Failed { error } => {
                warn!(
                    worker = %self.id,
                    task = %key,
                    error = %error,
                    retryable = error.is_retryable(),
                    "task failed"
                );
                RunResult {
                    key: key.clone(),
                    status: TaskStatus::Failed,
                    elapsed,
                    outputs: vec![],
                    error: Some(error.to_string()),
                }
            }
            ExecOutcome::Aborted => {
                warn!(
                    worker = %self.id,
                    task = %key,
                    limit_secs = self.config.max_processing_time.as_secs(),
                    "task aborted: processing-time ceiling exceeded"
                );
                RunResult {
                    key: key.clone(),
                    status: TaskStatus::Aborted,
                    elapsed,
                    outputs: vec![],
                    error: Some("processing time exceeded".to_string()),
                }
            }
        };
        self.metrics
            .record_task(result.status.as_str(), elapsed.as_secs_f64());
        result
    }

    /// Executes a catalog record directly, without queue involvement.
    ///
    /// This is the batch-mode path: the caller already owns the task.
    pub async fn execute_record(&self, record: &TaskRecord) -> RunResult {
        let (outcome, elapsed) = self.run_reduction(record).await;
        self.finish(&record.key, &outcome, elapsed)
    }

    /// Spawns the heartbeat that renews the lease while execution runs.
    ///
    /// The returned sender stops the heartbeat; the handle joins it.
    fn spawn_heartbeat(
        &self,
        dispatcher: &Dispatcher,
        task: &DispatchedTask,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let dispatcher = dispatcher.clone();
        let message = task.message.clone();
        let key = task.key.clone();
        let interval = self.config.renew_interval();
        let visibility = self.config.visibility_timeout;
        let metrics = self.metrics.clone();
        let worker_id = self.id.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = tokio::time::sleep(interval) => {
                        match dispatcher.renew(&message, visibility).await {
                            Ok(()) => {
                                metrics.record_lease_renewal();
                                debug!(worker = %worker_id, task = %key, "lease renewed");
                            }
                            Err(Error::LeaseLost { .. }) => {
                                warn!(
                                    worker = %worker_id,
                                    task = %key,
                                    "lease lost during execution; another worker may own it"
                                );
                                break;
                            }
                            Err(err) => {
                                // Transient transport trouble: keep the
                                // schedule and try again next tick.
                                warn!(worker = %worker_id, task = %key, error = %err, "lease renewal failed");
                            }
                        }
                    }
                }
            }
        });
        (stop_tx, handle)
    }

    /// Settles the queue message for a finished execution.
    async fn settle(&self, dispatcher: &Dispatcher, task: &DispatchedTask, outcome: &ExecOutcome) {
        match outcome {
            ExecOutcome::Completed { .. } => match dispatcher.complete(&task.message).await {
                Ok(()) => {}
                Err(Error::LeaseLost { .. }) => {
                    // The lease expired before we acked; the message will
                    // redeliver and the idempotent output makes the rerun
                    // harmless.
                    warn!(task = %task.key, "completed but lease already lost; task may rerun");
                }
                Err(err) => warn!(task = %task.key, error = %err, "ack failed"),
            },
            ExecOutcome::Failed { error } => {
                let buried = if error.is_retryable() {
                    match dispatcher.retry_or_bury(&task.message).await {
                        Ok(disposition) => disposition.is_dead_lettered(),
                        Err(err) => {
                            warn!(task = %task.key, error = %err, "failed to requeue message");
                            false
                        }
                    }
                } else {
                    match dispatcher.bury(&task.message).await {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(task = %task.key, error = %err, "failed to dead-letter message");
                            false
                        }
                    }
                };
                if buried {
                    self.metrics.record_dead_letter();
                    info!(
                        task = %task.key,
                        attempt = task.message.attempt,
                        "message dead-lettered"
                    );
                }
            }
            // No ack, no fail: the lease expires naturally and the
            // overrun shows up in logs and metrics for investigation.
            ExecOutcome::Aborted => {}
        }
    }

    /// Processes one leased task end to end.
    pub async fn process_task(&self, dispatcher: &Dispatcher, task: DispatchedTask) -> RunResult {
        let Some(record) = self.catalog.get(&task.key) else {
            // The catalog this worker opened does not know the key; the
            // message is poison for this fleet.
            warn!(task = %task.key, "task not in catalog; dead-lettering");
            if let Err(err) = dispatcher.bury(&task.message).await {
                warn!(task = %task.key, error = %err, "failed to dead-letter unknown task");
            } else {
                self.metrics.record_dead_letter();
            }
            return RunResult {
                key: task.key.clone(),
                status: TaskStatus::Failed,
                elapsed: Duration::ZERO,
                outputs: vec![],
                error: Some("task not found in catalog".to_string()),
            };
        };
        let record = record.clone();

        let (stop_tx, heartbeat) = self.spawn_heartbeat(dispatcher, &task);
        let (outcome, elapsed) = self.run_reduction(&record).await;
        let _ = stop_tx.send(true);
        let _ = heartbeat.await;

        self.settle(dispatcher, &task, &outcome).await;
        self.finish(&task.key, &outcome, elapsed)
    }

    /// Polls the queue until it stays empty for the quiescence window.
    ///
    /// Transport errors back off and retry; per-task failures are already
    /// routed to the dead-letter queue, so drain mode reports results but
    /// treats none of them as fatal.
    pub async fn run_queue(
        &self,
        dispatcher: &Dispatcher,
        drain: &crate::config::DrainConfig,
    ) -> Vec<RunResult> {
        let mut results = Vec::new();
        let mut empty_since: Option<Instant> = None;
        let mut backoff = drain.poll_interval;

        loop {
            match dispatcher.receive_task(self.config.visibility_timeout).await {
                Ok(Some(task)) => {
                    empty_since = None;
                    backoff = drain.poll_interval;
                    results.push(self.process_task(dispatcher, task).await);
                }
                Ok(None) => {
                    backoff = drain.poll_interval;
                    let drained = match dispatcher.depth().await {
                        Ok(depth) => {
                            self.metrics.set_queue_depth(dispatcher.queue_name(), depth);
                            depth.is_drained()
                        }
                        Err(err) => {
                            warn!(error = %err, "queue depth check failed");
                            false
                        }
                    };
                    if drained {
                        let since = *empty_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= drain.quiescence {
                            info!(
                                worker = %self.id,
                                processed = results.len(),
                                "queue quiescent; drain complete"
                            );
                            break;
                        }
                    } else {
                        // Other workers still hold leases; their failures
                        // may yet requeue messages.
                        empty_since = None;
                    }
                    tokio::time::sleep(drain.poll_interval).await;
                }
                Err(err) => {
                    warn!(worker = %self.id, error = %err, "receive failed; backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                }
            }
        }
        results
    }
}
