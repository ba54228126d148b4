//! Dataset references and the per-task record.
//!
//! Dataset discovery is an external collaborator: it hands Tessera groups
//! of dataset references already bucketed by task key. This module defines
//! the shapes those groupings take once inside the catalog.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task_key::TaskKey;

/// An opaque reference to one source dataset.
///
/// Tessera never decodes datasets itself; the id is resolved by the
/// reduction plugin at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    /// Collaborator-assigned dataset identifier.
    pub id: String,
    /// Acquisition timestamp of the underlying observation.
    pub acquired_at: DateTime<Utc>,
    /// Coordinate reference system the dataset is stored in.
    pub crs: String,
}

impl DatasetRef {
    /// Creates a new dataset reference.
    #[must_use]
    pub fn new(id: impl Into<String>, acquired_at: DateTime<Utc>, crs: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            acquired_at,
            crs: crs.into(),
        }
    }
}

/// One discovered grouping of datasets for a task key.
///
/// This is the unit the dataset-search collaborator emits; catalog
/// construction merges groupings that share a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetGroup {
    /// The task this grouping belongs to.
    pub key: TaskKey,
    /// Dataset references in the grouping.
    pub datasets: Vec<DatasetRef>,
}

/// The immutable catalog entry for one task.
///
/// Created once when the catalog is built and never mutated afterward.
/// The dataset sequence is ordered by acquisition time, then id, so a
/// record's byte form is independent of discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// The task key.
    pub key: TaskKey,
    /// Source datasets, ordered by `(acquired_at, id)`.
    pub datasets: Vec<DatasetRef>,
    /// Number of distinct acquisition instants among the datasets.
    ///
    /// Several datasets may share one overpass; this counts observations,
    /// not files.
    pub observation_count: u64,
}

impl TaskRecord {
    /// Builds a record from discovered dataset references.
    ///
    /// Sorts the datasets into their stable order and derives the
    /// observation count.
    #[must_use]
    pub fn from_datasets(key: TaskKey, mut datasets: Vec<DatasetRef>) -> Self {
        datasets.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let observation_count = datasets
            .iter()
            .map(|d| d.acquired_at)
            .collect::<BTreeSet<_>>()
            .len() as u64;
        Self {
            key,
            datasets,
            observation_count,
        }
    }

    /// Returns the number of source datasets.
    #[must_use]
    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_key::Period;
    use chrono::TimeZone;

    fn test_key() -> TaskKey {
        TaskKey::new(Period::new("2016--P1Y").unwrap(), 3, -4)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn record_orders_datasets_by_time_then_id() {
        let record = TaskRecord::from_datasets(
            test_key(),
            vec![
                DatasetRef::new("b", at(2), "EPSG:32755"),
                DatasetRef::new("a", at(2), "EPSG:32755"),
                DatasetRef::new("c", at(1), "EPSG:32755"),
            ],
        );
        let ids: Vec<&str> = record.datasets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn observation_count_collapses_shared_instants() {
        let record = TaskRecord::from_datasets(
            test_key(),
            vec![
                DatasetRef::new("a", at(1), "EPSG:32755"),
                DatasetRef::new("b", at(1), "EPSG:32756"),
                DatasetRef::new("c", at(2), "EPSG:32755"),
            ],
        );
        assert_eq!(record.observation_count, 2);
        assert_eq!(record.dataset_count(), 3);
    }

    #[test]
    fn record_serializes_with_canonical_key() {
        let record = TaskRecord::from_datasets(
            test_key(),
            vec![DatasetRef::new("a", at(1), "EPSG:32755")],
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"2016--P1Y/x+003/y-004\""));
        let parsed: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
