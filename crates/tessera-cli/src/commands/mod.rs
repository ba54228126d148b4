//! CLI subcommand implementations.

pub mod publish_tasks;
pub mod redrive_queue;
pub mod run;
pub mod save_tasks;

use std::sync::Arc;

use anyhow::Context;

use tessera_flow::plugin::{NoOpPlugin, ReductionPlugin};
use tessera_flow::queue::fs::FsQueue;
use tessera_flow::queue::memory::InMemoryQueue;
use tessera_flow::queue::QueueTransport;

/// Opens a queue transport from a URL.
///
/// `file:///path` (or a bare path) opens a filesystem queue shared across
/// processes; `mem://name` opens a queue that lives only inside this
/// invocation.
pub fn open_queue(url: &str) -> anyhow::Result<Arc<dyn QueueTransport>> {
    if let Some(name) = url.strip_prefix("mem://") {
        tracing::warn!(
            queue = name,
            "in-memory queue is per-process; other workers cannot see it"
        );
        return Ok(Arc::new(InMemoryQueue::new(name)));
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    let queue = FsQueue::open(path).with_context(|| format!("opening queue '{url}'"))?;
    Ok(Arc::new(queue))
}

/// Resolves a reduction plugin by name.
///
/// Real reductions are linked in by downstream builds; the in-tree
/// `noop` plugin exercises the scheduling path without computing.
pub fn resolve_plugin(name: &str) -> anyhow::Result<Arc<dyn ReductionPlugin>> {
    match name {
        "noop" => Ok(Arc::new(NoOpPlugin)),
        other => anyhow::bail!("unknown reduction plugin '{other}' (available: noop)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_urls_open_in_memory_queues() {
        let queue = open_queue("mem://scratch").unwrap();
        assert_eq!(queue.name(), "scratch");
    }

    #[test]
    fn file_urls_and_bare_paths_open_fs_queues() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("q1");
        let queue = open_queue(bare.to_str().unwrap()).unwrap();
        assert!(queue.name().contains("q1"));

        let url = format!("file://{}", dir.path().join("q2").display());
        let queue = open_queue(&url).unwrap();
        assert!(queue.name().contains("q2"));
    }

    #[test]
    fn unknown_plugins_are_rejected() {
        assert!(resolve_plugin("noop").is_ok());
        assert!(resolve_plugin("geomedian").is_err());
    }
}
