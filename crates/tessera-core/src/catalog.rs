//! The persisted, ordered task catalog.
//!
//! A catalog is built once from dataset-discovery output (`save-tasks`)
//! and opened read-only by every subsequent run. On disk it is a
//! self-contained JSON-lines file: a header line describing the format,
//! then one [`TaskRecord`] per line in catalog order. File order defines
//! the position index, so the same file always yields the same
//! position-to-key mapping, the invariant that makes index- and
//! slice-based task selection reproducible.
//!
//! In memory the catalog is an arena of records plus a key-to-position
//! index built once at load; lookups by key or position are O(1).

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetGroup, TaskRecord};
use crate::error::{Error, Result};
use crate::task_key::TaskKey;

/// On-disk format name, first line of every catalog file.
const FORMAT: &str = "tessera-catalog";

/// Current on-disk format version.
const VERSION: u32 = 1;

/// Self-describing header, the first line of a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogHeader {
    format: String,
    version: u32,
    count: u64,
    created_at: DateTime<Utc>,
}

/// The persisted, ordered registry of all tasks for a run.
///
/// Read access is lock-free and safe to share across worker threads; the
/// catalog is never modified after load.
#[derive(Debug)]
pub struct TaskCatalog {
    records: Vec<TaskRecord>,
    index: HashMap<TaskKey, usize>,
}

impl TaskCatalog {
    /// Builds a catalog from discovered dataset groupings.
    ///
    /// Groupings that share a task key are merged; records are ordered by
    /// the task-key total order, so the result is independent of discovery
    /// order.
    #[must_use]
    pub fn build(groups: impl IntoIterator<Item = DatasetGroup>) -> Self {
        let mut merged: BTreeMap<TaskKey, Vec<crate::dataset::DatasetRef>> = BTreeMap::new();
        for group in groups {
            merged.entry(group.key).or_default().extend(group.datasets);
        }
        let records: Vec<TaskRecord> = merged
            .into_iter()
            .map(|(key, datasets)| TaskRecord::from_datasets(key, datasets))
            .collect();
        Self::from_records(records)
    }

    fn from_records(records: Vec<TaskRecord>) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.key.clone(), position))
            .collect();
        Self { records, index }
    }

    /// Writes the catalog to a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] on I/O failure.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| Error::catalog_with_source(format!("create {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);

        let header = CatalogHeader {
            format: FORMAT.to_string(),
            version: VERSION,
            count: self.records.len() as u64,
            created_at: Utc::now(),
        };
        let io_err = |e| Error::catalog_with_source(format!("write {}", path.display()), e);
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n").map_err(io_err)?;
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    /// Opens a catalog file read-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] on I/O failure, an unrecognized header,
    /// a record count that disagrees with the header, or a duplicate task
    /// key.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::catalog_with_source(format!("open {}", path.display()), e))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| Error::catalog(format!("{}: empty catalog file", path.display())))?
            .map_err(|e| Error::catalog_with_source(format!("read {}", path.display()), e))?;
        let header: CatalogHeader = serde_json::from_str(&header_line)?;
        if header.format != FORMAT {
            return Err(Error::catalog(format!(
                "{}: not a task catalog (format '{}')",
                path.display(),
                header.format
            )));
        }
        if header.version != VERSION {
            return Err(Error::catalog(format!(
                "{}: unsupported catalog version {}",
                path.display(),
                header.version
            )));
        }

        let mut records = Vec::with_capacity(usize::try_from(header.count).unwrap_or(0));
        let mut index = HashMap::new();
        for line in lines {
            let line =
                line.map_err(|e| Error::catalog_with_source(format!("read {}", path.display()), e))?;
            if line.is_empty() {
                continue;
            }
            let record: TaskRecord = serde_json::from_str(&line)?;
            if index.insert(record.key.clone(), records.len()).is_some() {
                return Err(Error::catalog(format!(
                    "{}: duplicate task key {}",
                    path.display(),
                    record.key
                )));
            }
            records.push(record);
        }

        if records.len() as u64 != header.count {
            return Err(Error::catalog(format!(
                "{}: header says {} tasks, file has {}",
                path.display(),
                header.count,
                records.len()
            )));
        }

        Ok(Self { records, index })
    }

    /// Random access by task key.
    #[must_use]
    pub fn get(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.index.get(key).map(|&position| &self.records[position])
    }

    /// Returns the zero-based position of a key, if present.
    #[must_use]
    pub fn position_of(&self, key: &TaskKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Random access by zero-based position.
    #[must_use]
    pub fn by_position(&self, position: usize) -> Option<&TaskRecord> {
        self.records.get(position)
    }

    /// Total number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the catalog holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ordered enumeration of all records.
    ///
    /// The iterator is finite and restartable: each call starts a fresh
    /// pass in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter()
    }
}
