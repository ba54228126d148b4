//! End-to-end engine tests: catalog on disk, queue-mediated dispatch,
//! heartbeat under long tasks, dead-letter recovery via redrive.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use tessera_core::catalog::TaskCatalog;
use tessera_core::dataset::{DatasetGroup, DatasetRef, TaskRecord};
use tessera_core::selection;
use tessera_core::task_key::{Period, TaskKey};
use tessera_flow::config::{DispatchPolicy, DrainConfig, WorkerConfig};
use tessera_flow::dispatch::Dispatcher;
use tessera_flow::orchestrator::Orchestrator;
use tessera_flow::plugin::{
    MemoryWriter, NoOpPlugin, PluginContext, PluginError, Reduction, ReductionPlugin,
    SleepingPlugin,
};
use tessera_flow::queue::fs::FsQueue;
use tessera_flow::queue::memory::InMemoryQueue;
use tessera_flow::worker::Worker;

fn build_catalog(n: usize) -> TaskCatalog {
    let acquired = Utc.with_ymd_and_hms(2016, 6, 1, 0, 0, 0).unwrap();
    TaskCatalog::build((0..n).map(|i| DatasetGroup {
        key: TaskKey::new(
            Period::new("2016--P1Y").unwrap(),
            i32::try_from(i).unwrap(),
            0,
        ),
        datasets: vec![DatasetRef::new(format!("ds-{i}"), acquired, "EPSG:32755")],
    }))
}

fn fast_drain() -> DrainConfig {
    DrainConfig::default()
        .with_quiescence(Duration::from_millis(60))
        .with_poll_interval(Duration::from_millis(10))
}

/// Fails tasks on a fixed tile until told otherwise.
struct GrudgePlugin {
    bad_tile: i32,
    failures: AtomicUsize,
}

#[async_trait]
impl ReductionPlugin for GrudgePlugin {
    async fn reduce(
        &self,
        record: &TaskRecord,
        _context: &PluginContext,
    ) -> std::result::Result<Reduction, PluginError> {
        if record.key.tile_x == self.bad_tile {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(PluginError::retryable("simulated transient failure"))
        } else {
            Ok(Reduction::default())
        }
    }
}

/// The full distributed path: save a catalog to disk, publish a
/// selection onto a filesystem queue, drain it, recover the dead letters
/// with a redrive.
#[tokio::test]
async fn publish_drain_dead_letter_redrive_cycle() {
    let dir = tempfile::tempdir().unwrap();

    // save-tasks: build and persist, then reopen like a worker process.
    let catalog_path = dir.path().join("tasks.catalog");
    build_catalog(5).write(&catalog_path).unwrap();
    let catalog = Arc::new(TaskCatalog::open(&catalog_path).unwrap());

    // publish-tasks: every other task, plus the doomed tile explicitly.
    let outcome = selection::resolve(&["::2", "2016--P1Y/x+003/y+000"], &catalog);
    assert!(outcome.is_clean());
    let dispatcher = Dispatcher::new(
        Arc::new(FsQueue::open(dir.path().join("queue")).unwrap()),
        DispatchPolicy::default().with_max_attempts(2),
    );
    let keys: Vec<TaskKey> = outcome
        .positions
        .iter()
        .map(|&p| catalog.by_position(p).unwrap().key.clone())
        .collect();
    assert_eq!(dispatcher.publish_all(keys.iter()).await.unwrap(), 4);

    // First drain: tile x+003 exhausts its attempt budget.
    let plugin = Arc::new(GrudgePlugin {
        bad_tile: 3,
        failures: AtomicUsize::new(0),
    });
    let orch = Orchestrator::new(
        catalog.clone(),
        plugin.clone(),
        Arc::new(MemoryWriter::new()),
        WorkerConfig::default(),
        2,
    );
    let summary = orch.run_drain(&dispatcher, fast_drain()).await;
    assert_eq!(summary.completed(), 3);
    assert_eq!(plugin.failures.load(Ordering::SeqCst), 2, "two attempts");

    let depth = dispatcher.depth().await.unwrap();
    assert!(depth.is_drained());
    assert_eq!(depth.dead, 1, "exhausted task is dead-lettered");

    // redrive-queue, then a second drain with the grudge dropped.
    assert_eq!(dispatcher.redrive().await.unwrap(), 1);
    let forgiving = Orchestrator::new(
        catalog,
        Arc::new(NoOpPlugin),
        Arc::new(MemoryWriter::new()),
        WorkerConfig::default(),
        2,
    );
    let summary = forgiving.run_drain(&dispatcher, fast_drain()).await;
    assert_eq!(summary.completed(), 1);
    assert_eq!(dispatcher.depth().await.unwrap().dead, 0);
}

/// The ordering guarantee from the concurrency model: with the heartbeat
/// renewing ahead of the visibility timeout, a long-running task is never
/// handed to a second polling worker.
#[tokio::test]
async fn heartbeat_shields_long_task_from_competing_worker() {
    let catalog = Arc::new(build_catalog(1));
    let key = catalog.by_position(0).unwrap().key.clone();

    let dispatcher = Dispatcher::new(
        Arc::new(InMemoryQueue::new("contended")),
        DispatchPolicy::default(),
    );
    dispatcher.publish_key(&key).await.unwrap();

    // Visibility 150ms, margin 100ms -> renew every 50ms; the task takes
    // three full lease windows to finish.
    let config = WorkerConfig::default()
        .with_visibility_timeout(Duration::from_millis(150))
        .with_renew_safety_margin(Duration::from_millis(100));
    let slow_worker = Worker::new(
        catalog.clone(),
        Arc::new(SleepingPlugin::new(Duration::from_millis(450))),
        Arc::new(MemoryWriter::new()),
        config.clone(),
    );

    let task = dispatcher
        .receive_task(config.visibility_timeout)
        .await
        .unwrap()
        .expect("leased");

    let contender = dispatcher.clone();
    let poller = tokio::spawn(async move {
        let mut stolen = 0;
        for _ in 0..25 {
            if contender
                .receive_task(Duration::from_millis(150))
                .await
                .unwrap()
                .is_some()
            {
                stolen += 1;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        stolen
    });

    let result = slow_worker.process_task(&dispatcher, task).await;
    assert!(result.is_success());
    assert_eq!(poller.await.unwrap(), 0, "message was double-leased");
    assert!(dispatcher.depth().await.unwrap().is_drained());
}

/// An aborted task neither acks nor fails: the lease expires naturally
/// and the message redelivers to the next worker.
#[tokio::test]
async fn aborted_task_redelivers_after_lease_expiry() {
    let catalog = Arc::new(build_catalog(1));
    let key = catalog.by_position(0).unwrap().key.clone();

    let dispatcher = Dispatcher::new(
        Arc::new(InMemoryQueue::new("abort-test")),
        DispatchPolicy::default(),
    );
    dispatcher.publish_key(&key).await.unwrap();

    // Lease is short and the ceiling shorter than the plugin's sleep.
    let config = WorkerConfig::default()
        .with_visibility_timeout(Duration::from_millis(120))
        .with_renew_safety_margin(Duration::from_millis(100))
        .with_max_processing_time(Duration::from_millis(40));
    let worker = Worker::new(
        catalog.clone(),
        Arc::new(SleepingPlugin::new(Duration::from_secs(10))),
        Arc::new(MemoryWriter::new()),
        config.clone(),
    );

    let task = dispatcher
        .receive_task(config.visibility_timeout)
        .await
        .unwrap()
        .unwrap();
    let result = worker.process_task(&dispatcher, task).await;
    assert_eq!(result.status, tessera_flow::worker::TaskStatus::Aborted);

    // Not acked, not failed, not dead-lettered: it comes back by expiry.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let redelivered = dispatcher
        .receive_task(Duration::from_secs(30))
        .await
        .unwrap()
        .expect("redelivery after natural expiry");
    assert_eq!(redelivered.key, key);
    assert_eq!(redelivered.message.attempt, 2);
}
