//! `tessera run` - execute tasks, directly or by draining a queue.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use tessera_core::catalog::TaskCatalog;
use tessera_core::selection;
use tessera_flow::config::{DispatchPolicy, DrainConfig, WorkerConfig};
use tessera_flow::dispatch::Dispatcher;
use tessera_flow::orchestrator::{BatchSummary, Orchestrator};
use tessera_flow::plugin::FsWriter;
use tessera_flow::worker::RunResult;

use super::{open_queue, resolve_plugin};

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Catalog file.
    pub catalog: PathBuf,

    /// Task specifiers: explicit keys, indices, or slices. Empty selects
    /// the whole catalog (batch mode only).
    pub tasks: Vec<String>,

    /// Drain this queue instead of iterating the catalog.
    #[arg(long, env = "TESSERA_QUEUE")]
    pub queue: Option<String>,

    /// Worker pool size.
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub max_procs: usize,

    /// Reduction plugin to run.
    #[arg(long, default_value = "noop")]
    pub plugin: String,

    /// Output directory.
    #[arg(long, default_value = "outputs", value_name = "DIR")]
    pub output: PathBuf,

    /// Threads per reduction, passed through to the plugin.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Memory budget in bytes, passed through to the plugin.
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Queue visibility timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub visibility_timeout: u64,

    /// Heartbeat safety margin in seconds.
    #[arg(long, default_value_t = 60)]
    pub renew_safety_margin: u64,

    /// Per-task processing-time ceiling in seconds.
    #[arg(long, default_value_t = 3600)]
    pub max_processing_time: u64,

    /// Delivery attempts before a task is dead-lettered.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Seconds the queue must stay empty before drain mode exits.
    #[arg(long, default_value_t = 60)]
    pub quiescence: u64,
}

impl RunArgs {
    fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::default()
            .with_visibility_timeout(Duration::from_secs(self.visibility_timeout))
            .with_renew_safety_margin(Duration::from_secs(self.renew_safety_margin))
            .with_max_processing_time(Duration::from_secs(self.max_processing_time));
        config.threads = self.threads;
        config.memory_limit_bytes = self.memory_limit;
        config
    }
}

fn print_result(result: &RunResult) {
    let outputs = if result.outputs.is_empty() {
        String::new()
    } else {
        format!("  -> {}", result.outputs.join(", "))
    };
    let error = result
        .error
        .as_deref()
        .map(|e| format!("  ({e})"))
        .unwrap_or_default();
    println!(
        "{}  {}  {:.1}s{}{}",
        result.key,
        result.status,
        result.elapsed.as_secs_f64(),
        outputs,
        error
    );
}

fn print_summary(summary: &BatchSummary) {
    for result in &summary.results {
        print_result(result);
    }
    println!(
        "{} completed, {} failed, {} aborted",
        summary.completed(),
        summary.failed(),
        summary.aborted()
    );
}

/// Runs tasks in one of three modes: single task, batch list, or queue
/// drain.
///
/// Batch mode exits nonzero if any task failed; drain mode exits zero
/// once the queue is quiescent, with failures visible in the dead-letter
/// queue.
///
/// # Errors
///
/// Fails on an unreadable catalog, an unknown plugin, or an unreachable
/// queue.
pub async fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let catalog = Arc::new(
        TaskCatalog::open(&args.catalog)
            .with_context(|| format!("opening catalog {}", args.catalog.display()))?,
    );
    let orchestrator = Orchestrator::new(
        catalog.clone(),
        resolve_plugin(&args.plugin)?,
        Arc::new(FsWriter::new(&args.output)),
        args.worker_config(),
        args.max_procs,
    );

    // Distributed mode: drain the queue until quiescent.
    if let Some(queue_url) = &args.queue {
        let dispatcher = Dispatcher::new(
            open_queue(queue_url)?,
            DispatchPolicy::default().with_max_attempts(args.max_attempts),
        );
        let drain = DrainConfig::default()
            .with_quiescence(Duration::from_secs(args.quiescence))
            .with_poll_interval(Duration::from_secs(args.quiescence.clamp(1, 5)));
        let summary = orchestrator.run_drain(&dispatcher, drain).await;
        print_summary(&summary);

        let depth = dispatcher.depth().await?;
        if depth.dead > 0 {
            println!("{} tasks in the dead-letter queue", depth.dead);
        }
        // Drain mode succeeded: the queue is empty. Failures are
        // accounted for in the dead-letter queue, not the exit status.
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = selection::resolve(&args.tasks, &catalog);
    for (spec, err) in &outcome.rejected {
        eprintln!("skipping '{spec}': {err}");
    }

    // Single-task mode: the task's own outcome is the exit status.
    if args.tasks.len() == 1 && outcome.positions.len() == 1 && outcome.is_clean() {
        let result = orchestrator.run_single(outcome.positions[0]).await?;
        print_result(&result);
        return Ok(if result.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    // Batch mode over the resolved list.
    let outcome_clean = outcome.is_clean();
    let summary = orchestrator.run_batch(outcome.positions).await;
    print_summary(&summary);
    if summary.all_succeeded() && outcome_clean {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
