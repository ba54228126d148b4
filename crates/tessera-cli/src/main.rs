//! Tessera CLI - the main entry point for the `tessera` binary.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_cli::{Cli, Commands};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(async {
        match cli.command {
            Commands::SaveTasks(args) => tessera_cli::commands::save_tasks::execute(&args),
            Commands::Run(args) => tessera_cli::commands::run::execute(args).await,
            Commands::PublishTasks(args) => {
                tessera_cli::commands::publish_tasks::execute(&args).await
            }
            Commands::RedriveQueue(args) => {
                tessera_cli::commands::redrive_queue::execute(&args).await
            }
        }
    });

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
