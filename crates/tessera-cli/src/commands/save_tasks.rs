//! `tessera save-tasks` - build the task catalog.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use tracing::info;

use tessera_core::catalog::TaskCatalog;
use tessera_core::dataset::DatasetGroup;

/// Arguments for the save-tasks command.
#[derive(Debug, Args)]
pub struct SaveTasksArgs {
    /// Dataset-discovery output: one JSON dataset grouping per line.
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Catalog file to write.
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,
}

/// Builds and persists the task catalog.
///
/// # Errors
///
/// Fails on unreadable input, malformed groupings, or a write failure.
pub fn execute(args: &SaveTasksArgs) -> anyhow::Result<ExitCode> {
    let file = File::open(&args.input)
        .with_context(|| format!("opening discovery input {}", args.input.display()))?;

    let mut groups = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", args.input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let group: DatasetGroup = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: bad dataset grouping", args.input.display(), line_no + 1))?;
        groups.push(group);
    }

    let catalog = TaskCatalog::build(groups);
    catalog
        .write(&args.output)
        .with_context(|| format!("writing catalog {}", args.output.display()))?;

    info!(
        tasks = catalog.len(),
        catalog = %args.output.display(),
        "catalog saved"
    );
    println!("saved {} tasks to {}", catalog.len(), args.output.display());
    Ok(ExitCode::SUCCESS)
}
