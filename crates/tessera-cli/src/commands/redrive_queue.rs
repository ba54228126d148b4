//! `tessera redrive-queue` - move dead letters back to the main queue.

use std::process::ExitCode;

use clap::Args;

use tessera_flow::config::DispatchPolicy;
use tessera_flow::dispatch::Dispatcher;

use super::open_queue;

/// Arguments for the redrive-queue command.
#[derive(Debug, Args)]
pub struct RedriveQueueArgs {
    /// Queue URL whose dead letters should be requeued.
    pub queue: String,

    /// Keep delivery counts instead of resetting them to zero.
    #[arg(long)]
    pub keep_attempts: bool,
}

/// Moves every dead-lettered message back to the main queue.
///
/// # Errors
///
/// Fails if the queue cannot be opened or the move fails partway.
pub async fn execute(args: &RedriveQueueArgs) -> anyhow::Result<ExitCode> {
    let dispatcher = Dispatcher::new(
        open_queue(&args.queue)?,
        DispatchPolicy::default().with_reset_attempts_on_redrive(!args.keep_attempts),
    );

    let moved = dispatcher.redrive().await?;
    let depth = dispatcher.depth().await?;
    println!(
        "redrove {moved} messages to {} ({} now ready)",
        dispatcher.queue_name(),
        depth.ready
    );
    Ok(ExitCode::SUCCESS)
}
