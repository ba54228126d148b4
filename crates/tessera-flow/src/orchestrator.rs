//! Run modes: single task, bounded-concurrency batch, queue drain.
//!
//! The orchestrator owns the ingredients (catalog, plugin, writer,
//! worker config) and builds a fresh [`Worker`] instance per concurrency
//! slot. Workers share nothing mutable: the catalog is read-only, the
//! queue is the only coordination point, and batch mode feeds positions
//! from a shared atomic cursor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use tessera_core::catalog::TaskCatalog;
use tessera_core::error::Error as CoreError;

use crate::config::{DrainConfig, WorkerConfig};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::plugin::{OutputWriter, ReductionPlugin};
use crate::worker::{RunResult, TaskStatus, Worker};

/// Aggregated outcome of a batch or drain run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Per-task results, in completion order.
    pub results: Vec<RunResult>,
}

impl BatchSummary {
    /// Number of completed tasks.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    /// Number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    /// Number of aborted tasks.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.count(TaskStatus::Aborted)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Returns true if every task completed.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(RunResult::is_success)
    }
}

/// Chooses a run mode and drives worker instances through it.
pub struct Orchestrator {
    catalog: Arc<TaskCatalog>,
    plugin: Arc<dyn ReductionPlugin>,
    writer: Arc<dyn OutputWriter>,
    config: WorkerConfig,
    concurrency: usize,
}

impl Orchestrator {
    /// Creates an orchestrator with a fixed worker-pool size.
    #[must_use]
    pub fn new(
        catalog: Arc<TaskCatalog>,
        plugin: Arc<dyn ReductionPlugin>,
        writer: Arc<dyn OutputWriter>,
        config: WorkerConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            plugin,
            writer,
            config,
            concurrency: concurrency.max(1),
        }
    }

    fn make_worker(&self) -> Arc<Worker> {
        Arc::new(Worker::new(
            self.catalog.clone(),
            self.plugin.clone(),
            self.writer.clone(),
            self.config.clone(),
        ))
    }

    /// Executes one task by catalog position and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if the position is beyond the catalog.
    pub async fn run_single(&self, position: usize) -> Result<RunResult> {
        let record = self
            .catalog
            .by_position(position)
            .ok_or_else(|| CoreError::IndexOutOfRange {
                index: position,
                len: self.catalog.len(),
            })?
            .clone();
        Ok(self.make_worker().execute_record(&record).await)
    }

    /// Executes a task list with bounded concurrency.
    ///
    /// Spawns up to `concurrency` worker instances, each pulling the next
    /// position from a shared cursor until the list is exhausted. Repeats
    /// in the list are executed repeatedly, as selected.
    pub async fn run_batch(&self, positions: Vec<usize>) -> BatchSummary {
        if positions.is_empty() {
            return BatchSummary::default();
        }
        let positions = Arc::new(positions);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let slots = self.concurrency.min(positions.len());
        let mut handles = Vec::with_capacity(slots);
        for _ in 0..slots {
            let worker = self.make_worker();
            let catalog = self.catalog.clone();
            let positions = positions.clone();
            let cursor = cursor.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(&position) = positions.get(next) else {
                        break;
                    };
                    let Some(record) = catalog.by_position(position) else {
                        warn!(position, "batch position beyond catalog; skipping");
                        continue;
                    };
                    let record = record.clone();
                    let result = worker.execute_record(&record).await;
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut summary = BatchSummary::default();
        while let Some(result) = rx.recv().await {
            summary.results.push(result);
        }
        for handle in handles {
            let _ = handle.await;
        }
        summary
    }

    /// Drains the queue with a pool of polling workers.
    ///
    /// Exits once every worker has seen the queue empty for the
    /// quiescence window. Per-task failures are already routed to the
    /// dead-letter queue, so the summary is informational: drain mode
    /// succeeds when the queue is empty, regardless of task outcomes.
    pub async fn run_drain(&self, dispatcher: &Dispatcher, drain: DrainConfig) -> BatchSummary {
        let mut handles = Vec::with_capacity(self.concurrency);
        for _ in 0..self.concurrency {
            let worker = self.make_worker();
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                worker.run_queue(&dispatcher, &drain).await
            }));
        }

        let mut summary = BatchSummary::default();
        for handle in handles {
            match handle.await {
                Ok(results) => summary.results.extend(results),
                Err(err) => warn!(error = %err, "drain worker panicked"),
            }
        }
        summary
    }
}
