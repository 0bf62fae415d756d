//! Shared fixtures for scan planning tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{
    DataFile, DataType, ManifestEntry, PartitionField, PartitionSpec, Scalar, Schema, Snapshot,
    StructField, Transform,
};
use crate::table::ManifestSource;

/// The schema most fixtures use: a long id, a string payload, and a string
/// partition-ish category column.
pub fn test_schema() -> Schema {
    Schema::new(vec![
        StructField::not_null(1, "id", DataType::LONG),
        StructField::new(2, "data", DataType::STRING),
        StructField::new(3, "category", DataType::STRING),
    ])
}

/// An identity partition spec over the `category` column.
pub fn category_spec() -> PartitionSpec {
    PartitionSpec {
        spec_id: 0,
        fields: vec![PartitionField {
            source_id: 3,
            field_id: 1000,
            name: "category".into(),
            transform: Transform::Identity,
        }],
    }
}

/// A data file in the given category partition, with exact id bounds.
pub fn category_file(
    path: &str,
    category: &str,
    records: i64,
    id_lower: i64,
    id_upper: i64,
) -> DataFile {
    DataFile::new(path, 0, records, records * 100)
        .with_partition_value("category", Scalar::String(category.into()))
        .with_counts(1, records, 0)
        .with_counts(3, records, 0)
        .with_bounds(1, Scalar::Long(id_lower), Scalar::Long(id_upper))
}

/// An in-memory [`ManifestSource`] stocked per snapshot id, with an optional
/// one-shot listing failure for pushdown fallback tests.
#[derive(Default)]
pub struct TestSource {
    files: HashMap<i64, Vec<ManifestEntry>>,
    added: HashMap<i64, Vec<ManifestEntry>>,
    removed: HashMap<i64, Vec<ManifestEntry>>,
    fail_next_listing: AtomicBool,
}

impl TestSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full file listing for a snapshot.
    pub fn with_files(mut self, snapshot_id: i64, entries: Vec<ManifestEntry>) -> Self {
        self.files.insert(snapshot_id, entries);
        self
    }

    /// Set the files added by a snapshot's commit.
    pub fn with_added(mut self, snapshot_id: i64, entries: Vec<ManifestEntry>) -> Self {
        self.added.insert(snapshot_id, entries);
        self
    }

    /// Set the files removed by a snapshot's commit.
    pub fn with_removed(mut self, snapshot_id: i64, entries: Vec<ManifestEntry>) -> Self {
        self.removed.insert(snapshot_id, entries);
        self
    }

    /// Make the next `files` call fail, as a storage outage would.
    pub fn fail_next_listing(&self) {
        self.fail_next_listing.store(true, Ordering::SeqCst);
    }
}

impl ManifestSource for TestSource {
    fn files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
        if self.fail_next_listing.swap(false, Ordering::SeqCst) {
            return Err(StrataTableError::ManifestSource {
                source: "synthetic listing failure".into(),
            });
        }
        Ok(self
            .files
            .get(&snapshot.snapshot_id)
            .cloned()
            .unwrap_or_default())
    }

    fn added_files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
        Ok(self
            .added
            .get(&snapshot.snapshot_id)
            .cloned()
            .unwrap_or_default())
    }

    fn removed_files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
        Ok(self
            .removed
            .get(&snapshot.snapshot_id)
            .cloned()
            .unwrap_or_default())
    }
}
