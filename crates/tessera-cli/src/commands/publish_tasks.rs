//! `tessera publish-tasks` - publish a task selection onto a queue.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use tessera_core::catalog::TaskCatalog;
use tessera_core::selection;
use tessera_flow::config::DispatchPolicy;
use tessera_flow::dispatch::Dispatcher;

use super::open_queue;

/// Arguments for the publish-tasks command.
#[derive(Debug, Args)]
pub struct PublishTasksArgs {
    /// Catalog file.
    pub catalog: PathBuf,

    /// Queue URL to publish to.
    pub queue: String,

    /// Task specifiers: explicit keys, indices, or slices. Empty selects
    /// the whole catalog.
    pub tasks: Vec<String>,
}

/// Resolves the selection and publishes the keys.
///
/// A bad specifier does not abort the rest of the selection, but it does
/// turn the exit status nonzero.
///
/// # Errors
///
/// Fails on an unreadable catalog or an unreachable queue.
pub async fn execute(args: &PublishTasksArgs) -> anyhow::Result<ExitCode> {
    let catalog = Arc::new(
        TaskCatalog::open(&args.catalog)
            .with_context(|| format!("opening catalog {}", args.catalog.display()))?,
    );

    let outcome = selection::resolve(&args.tasks, &catalog);
    for (spec, err) in &outcome.rejected {
        eprintln!("skipping '{spec}': {err}");
    }

    let dispatcher = Dispatcher::new(open_queue(&args.queue)?, DispatchPolicy::default());
    let keys = outcome
        .positions
        .iter()
        .filter_map(|&position| catalog.by_position(position))
        .map(|record| &record.key);
    let published = dispatcher
        .publish_all(keys)
        .await
        .context("publishing task keys")?;

    println!("published {published} tasks to {}", dispatcher.queue_name());
    if outcome.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
