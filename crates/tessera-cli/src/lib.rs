//! # tessera-cli
//!
//! Command-line interface for Tessera.
//!
//! ## Commands
//!
//! - `tessera save-tasks` - Build the task catalog from dataset discovery
//! - `tessera run` - Execute tasks: batch over a catalog or drain a queue
//! - `tessera publish-tasks` - Publish a task selection onto a queue
//! - `tessera redrive-queue` - Move dead-lettered messages back to main
//!
//! ## Queue URLs
//!
//! - `file:///shared/queue` (or a bare path) - filesystem queue, shared
//!   between processes
//! - `mem://name` - in-process queue, useful for a publish-then-drain run
//!   inside one invocation
//!
//! ## Environment
//!
//! - `TESSERA_QUEUE` - default queue URL for `run --queue`
//! - `RUST_LOG` - log filter (default `info`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use clap::{Parser, Subcommand};

/// Tessera - tiled Earth-observation statistics scheduling.
#[derive(Debug, Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the task catalog from dataset-discovery output.
    SaveTasks(commands::save_tasks::SaveTasksArgs),
    /// Execute tasks from a catalog, directly or by draining a queue.
    Run(commands::run::RunArgs),
    /// Publish a task selection onto a work queue.
    PublishTasks(commands::publish_tasks::PublishTasksArgs),
    /// Move dead-lettered messages back to the main queue.
    RedriveQueue(commands::redrive_queue::RedriveQueueArgs),
}
