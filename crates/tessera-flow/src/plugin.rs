//! Seams for the external reduction library and output writer.
//!
//! The numeric reduction (geometric median and friends) and the
//! cloud-optimized output encoding are external collaborators. Tessera
//! only needs success/failure, a retryable/fatal distinction, and
//! something to hand to the writer. Implementations of these traits wrap
//! the real libraries; the doubles here back the test suites.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use tessera_core::dataset::TaskRecord;
use tessera_core::task_key::TaskKey;

use crate::error::{Error, Result};

/// Per-invocation context handed to the reduction plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Opaque plugin configuration map.
    pub config: HashMap<String, String>,
    /// Cooperative deadline: a well-behaved plugin checks it and returns
    /// early. The engine also enforces it from outside.
    pub deadline: Option<DateTime<Utc>>,
    /// Thread budget, if limited.
    pub threads: Option<usize>,
    /// Memory budget in bytes, if limited.
    pub memory_limit_bytes: Option<u64>,
}

/// A reduction failure, with the retryable/fatal distinction the retry
/// policy needs.
#[derive(Debug, Clone)]
pub struct PluginError {
    /// Description of the failure.
    pub message: String,
    /// True for failures retrying cannot fix (e.g. malformed input data).
    pub fatal: bool,
}

impl PluginError {
    /// Creates a retryable plugin error (transient I/O and the like).
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// Creates a fatal plugin error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<PluginError> for Error {
    fn from(err: PluginError) -> Self {
        Self::PluginCompute {
            message: err.message,
            fatal: err.fatal,
        }
    }
}

/// The opaque product of one reduction.
#[derive(Debug, Clone, Default)]
pub struct Reduction {
    /// Encoded output, ready for the writer.
    pub payload: Bytes,
    /// Output band names, in write order.
    pub bands: Vec<String>,
    /// How many source datasets contributed.
    pub datasets_used: usize,
}

/// The external reduction library behind a trait.
#[async_trait]
pub trait ReductionPlugin: Send + Sync {
    /// Reduces one task's datasets to an output product.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginError`] marked fatal for failures that retrying
    /// cannot fix.
    async fn reduce(
        &self,
        record: &TaskRecord,
        context: &PluginContext,
    ) -> std::result::Result<Reduction, PluginError>;

    /// Short plugin name for logs and metrics.
    fn name(&self) -> &str {
        "reduction"
    }
}

/// The external output encoder/persister behind a trait.
///
/// Writes must be idempotent overwrites keyed by task key: repeated
/// execution of the same task (at-least-once delivery) replaces the
/// output rather than corrupting it.
#[async_trait]
pub trait OutputWriter: Send + Sync {
    /// Deterministic output location for a task key.
    fn location_for(&self, key: &TaskKey) -> String;

    /// Persists a reduction, returning the locations written.
    async fn write(&self, key: &TaskKey, reduction: &Reduction) -> Result<Vec<String>>;
}

/// A plugin that succeeds immediately without computing anything.
#[derive(Debug, Default)]
pub struct NoOpPlugin;

#[async_trait]
impl ReductionPlugin for NoOpPlugin {
    async fn reduce(
        &self,
        record: &TaskRecord,
        _context: &PluginContext,
    ) -> std::result::Result<Reduction, PluginError> {
        Ok(Reduction {
            payload: Bytes::new(),
            bands: vec![],
            datasets_used: record.dataset_count(),
        })
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// A plugin that always fails with a configurable error.
#[derive(Debug)]
pub struct FailingPlugin {
    error: PluginError,
}

impl FailingPlugin {
    /// Creates a failing plugin with the given error.
    #[must_use]
    pub const fn new(error: PluginError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl ReductionPlugin for FailingPlugin {
    async fn reduce(
        &self,
        _record: &TaskRecord,
        _context: &PluginContext,
    ) -> std::result::Result<Reduction, PluginError> {
        Err(self.error.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// A plugin that sleeps, for exercising the processing-time ceiling.
#[derive(Debug)]
pub struct SleepingPlugin {
    duration: Duration,
}

impl SleepingPlugin {
    /// Creates a plugin that sleeps for `duration` before succeeding.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl ReductionPlugin for SleepingPlugin {
    async fn reduce(
        &self,
        record: &TaskRecord,
        _context: &PluginContext,
    ) -> std::result::Result<Reduction, PluginError> {
        tokio::time::sleep(self.duration).await;
        Ok(Reduction {
            payload: Bytes::new(),
            bands: vec![],
            datasets_used: record.dataset_count(),
        })
    }

    fn name(&self) -> &str {
        "sleeping"
    }
}

/// In-memory output writer for tests.
///
/// Remembers the last write per location, so tests can assert idempotent
/// overwrite behavior.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    written: RwLock<HashMap<String, usize>>,
}

impl MemoryWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes recorded for a key's location.
    #[must_use]
    pub fn write_count(&self, key: &TaskKey) -> usize {
        self.written
            .read()
            .map(|map| map.get(&self.location_for(key)).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl OutputWriter for MemoryWriter {
    fn location_for(&self, key: &TaskKey) -> String {
        format!("mem://outputs/{key}")
    }

    async fn write(&self, key: &TaskKey, _reduction: &Reduction) -> Result<Vec<String>> {
        let location = self.location_for(key);
        let mut map = self
            .written
            .write()
            .map_err(|_| Error::output_write("writer lock poisoned"))?;
        *map.entry(location.clone()).or_insert(0) += 1;
        Ok(vec![location])
    }
}

/// Filesystem output writer.
///
/// Lays outputs out as `<root>/<period>/<x>/<y>/reduction.bin`, one
/// deterministic path per task key, overwritten in place on re-runs.
#[derive(Debug)]
pub struct FsWriter {
    root: std::path::PathBuf,
}

impl FsWriter {
    /// Creates a writer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &TaskKey) -> std::path::PathBuf {
        self.root
            .join(key.period.as_str())
            .join(format!("x{:+04}", key.tile_x))
            .join(format!("y{:+04}", key.tile_y))
            .join("reduction.bin")
    }
}

#[async_trait]
impl OutputWriter for FsWriter {
    fn location_for(&self, key: &TaskKey) -> String {
        self.path_for(key).display().to_string()
    }

    async fn write(&self, key: &TaskKey, reduction: &Reduction) -> Result<Vec<String>> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::output_write_with_source(format!("create {}", parent.display()), e)
            })?;
        }
        std::fs::write(&path, &reduction.payload)
            .map_err(|e| Error::output_write_with_source(format!("write {}", path.display()), e))?;
        Ok(vec![path.display().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tessera_core::dataset::DatasetRef;
    use tessera_core::task_key::Period;

    fn record() -> TaskRecord {
        let acquired = Utc.with_ymd_and_hms(2016, 6, 1, 0, 0, 0).unwrap();
        TaskRecord::from_datasets(
            TaskKey::new(Period::new("2016--P1Y").unwrap(), 3, -4),
            vec![
                DatasetRef::new("a", acquired, "EPSG:32755"),
                DatasetRef::new("b", acquired, "EPSG:32755"),
            ],
        )
    }

    #[tokio::test]
    async fn noop_plugin_reports_datasets_used() {
        let record = record();
        let reduction = NoOpPlugin
            .reduce(&record, &PluginContext::default())
            .await
            .unwrap();
        assert_eq!(reduction.datasets_used, 2);
    }

    #[tokio::test]
    async fn failing_plugin_carries_fatality() {
        let plugin = FailingPlugin::new(PluginError::fatal("corrupt input"));
        let err = plugin
            .reduce(&record(), &PluginContext::default())
            .await
            .unwrap_err();
        assert!(err.fatal);
        assert!(!Error::from(err).is_retryable());
    }

    #[tokio::test]
    async fn memory_writer_counts_overwrites() {
        let writer = MemoryWriter::new();
        let record = record();
        let reduction = Reduction::default();

        writer.write(&record.key, &reduction).await.unwrap();
        writer.write(&record.key, &reduction).await.unwrap();
        assert_eq!(writer.write_count(&record.key), 2);
    }

    #[tokio::test]
    async fn fs_writer_is_deterministic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsWriter::new(dir.path());
        let record = record();
        let reduction = Reduction {
            payload: Bytes::from_static(b"product"),
            bands: vec!["red".into()],
            datasets_used: 2,
        };

        let first = writer.write(&record.key, &reduction).await.unwrap();
        let second = writer.write(&record.key, &reduction).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![writer.location_for(&record.key)]);
        assert!(first[0].contains("2016--P1Y"));
        assert!(first[0].contains("x+003"));
        assert!(first[0].contains("y-004"));
    }
}
