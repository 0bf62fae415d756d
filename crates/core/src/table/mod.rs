//! Stratalake table metadata view
//!
//! A [`StrataTable`] is the immutable, snapshot-consistent view of a table's
//! metadata that scan planning runs against: schema history, partition spec
//! history, snapshot history with named refs, and configuration. The catalog
//! collaborator that loads tables hands the planner one of these; the planner
//! never re-reads table state mid-build, which is what makes a plan
//! deterministic for a fixed table state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{
    ManifestEntry, PartitionSpec, RefKind, Schema, SchemaRef, Snapshot, TableRef,
};

pub mod config;

use config::TableConfig;

/// The manifest listing collaborator.
///
/// Implementations read a snapshot's manifest list and yield parsed
/// [`ManifestEntry`] records. Listing may block on storage I/O; the planner
/// treats one listing pass as a single blocking step. Errors are propagated
/// as hard failures for ordinary planning and absorbed (with a fallback to a
/// normal scan) only inside the aggregate pushdown pass.
pub trait ManifestSource: Send + Sync {
    /// All data files live in the given snapshot, with their delete files.
    fn files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>>;

    /// The data files added by the given snapshot's commit.
    fn added_files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>>;

    /// The data files logically removed by the given snapshot's commit.
    fn removed_files(&self, snapshot: &Snapshot) -> StrataResult<Vec<ManifestEntry>>;
}

/// Reference counted manifest source
pub type ManifestSourceRef = Arc<dyn ManifestSource>;

/// An immutable view of a stratalake table's metadata.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StrataTable {
    name: String,
    schemas: BTreeMap<i32, SchemaRef>,
    current_schema_id: i32,
    specs: BTreeMap<i32, PartitionSpec>,
    default_spec_id: i32,
    snapshots: HashMap<i64, Snapshot>,
    current_snapshot_id: Option<i64>,
    refs: HashMap<String, TableRef>,
    properties: HashMap<String, String>,
}

impl StrataTable {
    /// Start building a table metadata view.
    pub fn builder(name: impl Into<String>) -> StrataTableBuilder {
        StrataTableBuilder::new(name)
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current schema.
    pub fn schema(&self) -> &SchemaRef {
        // builder guarantees the current schema id resolves
        &self.schemas[&self.current_schema_id]
    }

    /// Every historical schema version, oldest id first.
    ///
    /// Metadata-column id reassignment depends on the *full* history being
    /// available here, not just the current schema.
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaRef> {
        self.schemas.values()
    }

    /// Look up a schema version by id.
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&SchemaRef> {
        self.schemas.get(&schema_id)
    }

    /// The schema to read the given snapshot with.
    pub fn schema_for_snapshot(&self, snapshot: &Snapshot) -> &SchemaRef {
        snapshot
            .schema_id
            .and_then(|id| self.schemas.get(&id))
            .unwrap_or_else(|| self.schema())
    }

    /// The default (latest) partition spec.
    pub fn spec(&self) -> &PartitionSpec {
        &self.specs[&self.default_spec_id]
    }

    /// Every partition spec over the table's lifetime, oldest id first.
    pub fn specs(&self) -> impl Iterator<Item = &PartitionSpec> {
        self.specs.values()
    }

    /// Look up a partition spec by id.
    pub fn spec_by_id(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.specs.get(&spec_id)
    }

    /// True when no spec across the table's entire history is partitioned.
    pub fn is_unpartitioned(&self) -> bool {
        self.specs.values().all(|spec| !spec.is_partitioned())
    }

    /// The current snapshot, if the table is not empty.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshots.get(&id))
    }

    /// Look up a snapshot by id.
    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.get(&snapshot_id)
    }

    /// Look up a named branch or tag.
    pub fn table_ref(&self, name: &str) -> Option<&TableRef> {
        self.refs.get(name)
    }

    /// Resolve a named ref to its snapshot, failing when the ref or the
    /// snapshot it points at does not exist.
    pub fn resolve_ref(&self, name: &str) -> StrataResult<&Snapshot> {
        let table_ref = self
            .refs
            .get(name)
            .ok_or_else(|| StrataTableError::RefNotFound(name.to_string()))?;
        self.snapshots
            .get(&table_ref.snapshot_id)
            .ok_or(StrataTableError::SnapshotNotFound(table_ref.snapshot_id))
    }

    /// The head of the given branch, or the current snapshot when no branch
    /// is named. `Ok(None)` means the table (or branch) is empty.
    pub fn latest_snapshot(&self, branch: Option<&str>) -> StrataResult<Option<&Snapshot>> {
        match branch {
            Some(name) => self.resolve_ref(name).map(Some),
            None => Ok(self.current_snapshot()),
        }
    }

    /// The ancestor chain of the given snapshot, newest first, including the
    /// snapshot itself.
    pub fn ancestors_of(&self, snapshot_id: i64) -> Vec<&Snapshot> {
        let mut ancestors = Vec::new();
        let mut next = self.snapshots.get(&snapshot_id);
        while let Some(snapshot) = next {
            ancestors.push(snapshot);
            next = snapshot.parent_id.and_then(|id| self.snapshots.get(&id));
        }
        ancestors
    }

    /// The ancestor chain of the current snapshot, newest first.
    pub fn current_ancestors(&self) -> Vec<&Snapshot> {
        match self.current_snapshot_id {
            Some(id) => self.ancestors_of(id),
            None => Vec::new(),
        }
    }

    /// The newest ancestor of the current snapshot committed at or before the
    /// given point in time.
    pub fn snapshot_as_of(&self, timestamp_ms: i64) -> Option<&Snapshot> {
        self.current_ancestors()
            .into_iter()
            .find(|snapshot| snapshot.timestamp_ms <= timestamp_ms)
    }

    /// The oldest ancestor of the current snapshot committed at or after the
    /// given point in time.
    pub fn oldest_ancestor_after(&self, timestamp_ms: i64) -> Option<&Snapshot> {
        let mut last = None;
        for snapshot in self.current_ancestors() {
            if snapshot.timestamp_ms < timestamp_ms {
                break;
            }
            last = Some(snapshot);
        }
        last
    }

    /// Ancestors after `start_exclusive` up to and including `end`, ordered
    /// oldest first. Fails when `start_exclusive` is not an ancestor of
    /// `end`.
    pub fn ancestors_between(
        &self,
        start_exclusive: i64,
        end: i64,
    ) -> StrataResult<Vec<&Snapshot>> {
        let mut range = Vec::new();
        for snapshot in self.ancestors_of(end) {
            if snapshot.snapshot_id == start_exclusive {
                range.reverse();
                return Ok(range);
            }
            range.push(snapshot);
        }
        Err(StrataTableError::NotAnAncestor {
            start: start_exclusive,
            end,
        })
    }

    /// Parse a table metadata view from its JSON representation.
    pub fn from_json(metadata: &str) -> StrataResult<Self> {
        serde_json::from_str(metadata)
            .map_err(|err| StrataTableError::MetadataError(err.to_string()))
    }

    /// Serialize this metadata view to JSON.
    pub fn to_json(&self) -> StrataResult<String> {
        serde_json::to_string(self)
            .map_err(|err| StrataTableError::MetadataError(err.to_string()))
    }

    /// The raw table properties.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Well known configuration values backed by the property map.
    pub fn config(&self) -> TableConfig<'_> {
        TableConfig(&self.properties)
    }
}

/// Builder for [`StrataTable`] metadata views, validating the structural
/// invariants of the snapshot history on `build`.
pub struct StrataTableBuilder {
    name: String,
    schemas: BTreeMap<i32, SchemaRef>,
    current_schema_id: Option<i32>,
    specs: BTreeMap<i32, PartitionSpec>,
    snapshots: Vec<Snapshot>,
    pinned_snapshot_id: Option<i64>,
    refs: HashMap<String, TableRef>,
    properties: HashMap<String, String>,
}

impl StrataTableBuilder {
    /// Create a builder for a table with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schemas: BTreeMap::new(),
            current_schema_id: None,
            specs: BTreeMap::new(),
            snapshots: Vec::new(),
            pinned_snapshot_id: None,
            refs: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Add a schema version. The highest id becomes current unless
    /// [`with_current_schema_id`](Self::with_current_schema_id) is used.
    pub fn with_schema(mut self, schema_id: i32, schema: Schema) -> Self {
        self.schemas.insert(schema_id, Arc::new(schema));
        self
    }

    /// Pin the current schema version.
    pub fn with_current_schema_id(mut self, schema_id: i32) -> Self {
        self.current_schema_id = Some(schema_id);
        self
    }

    /// Add a partition spec. The highest id becomes the default spec.
    pub fn with_partition_spec(mut self, spec: PartitionSpec) -> Self {
        self.specs.insert(spec.spec_id, spec);
        self
    }

    /// Append a snapshot to the history. The last appended snapshot becomes
    /// current unless [`with_current_snapshot_id`](Self::with_current_snapshot_id)
    /// is used.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshots.push(snapshot);
        self
    }

    /// Pin the current snapshot.
    pub fn with_current_snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.pinned_snapshot_id = Some(snapshot_id);
        self
    }

    /// Add a named branch or tag.
    pub fn with_ref(mut self, name: impl Into<String>, snapshot_id: i64, kind: RefKind) -> Self {
        self.refs.insert(name.into(), TableRef { snapshot_id, kind });
        self
    }

    /// Set a table property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Validate the metadata and build the table view.
    pub fn build(self) -> StrataResult<StrataTable> {
        if self.schemas.is_empty() {
            return Err(StrataTableError::MetadataError(
                "table requires at least one schema version".into(),
            ));
        }
        let current_schema_id = match self.current_schema_id {
            Some(id) if !self.schemas.contains_key(&id) => {
                return Err(StrataTableError::MetadataError(format!(
                    "current schema id {id} is not a known schema version"
                )))
            }
            Some(id) => id,
            // keys are sorted, the last one is the highest id
            None => *self.schemas.keys().last().unwrap(),
        };

        let mut specs = self.specs;
        if specs.is_empty() {
            specs.insert(0, PartitionSpec::unpartitioned(0));
        }
        let default_spec_id = *specs.keys().last().unwrap();

        let current_snapshot_id = self
            .pinned_snapshot_id
            .or_else(|| self.snapshots.last().map(|s| s.snapshot_id));

        let mut snapshots: HashMap<i64, Snapshot> = HashMap::new();
        let mut ids = HashSet::new();
        for snapshot in &self.snapshots {
            if !ids.insert(snapshot.snapshot_id) {
                return Err(StrataTableError::MetadataError(format!(
                    "duplicate snapshot id {}",
                    snapshot.snapshot_id
                )));
            }
        }
        for snapshot in self.snapshots {
            if let Some(parent_id) = snapshot.parent_id {
                if !ids.contains(&parent_id) {
                    return Err(StrataTableError::MetadataError(format!(
                        "snapshot {} references unknown parent {parent_id}",
                        snapshot.snapshot_id
                    )));
                }
            }
            snapshots.insert(snapshot.snapshot_id, snapshot);
        }
        // timestamps are non-decreasing along every ancestor chain
        for snapshot in snapshots.values() {
            if let Some(parent) = snapshot.parent_id.and_then(|id| snapshots.get(&id)) {
                if snapshot.timestamp_ms < parent.timestamp_ms {
                    return Err(StrataTableError::MetadataError(format!(
                        "snapshot {} is older than its parent {}",
                        snapshot.snapshot_id, parent.snapshot_id
                    )));
                }
            }
        }

        if let Some(current) = current_snapshot_id {
            if !snapshots.contains_key(&current) {
                return Err(StrataTableError::SnapshotNotFound(current));
            }
        }
        for (name, table_ref) in &self.refs {
            if !snapshots.contains_key(&table_ref.snapshot_id) {
                return Err(StrataTableError::MetadataError(format!(
                    "ref '{name}' points at unknown snapshot {}",
                    table_ref.snapshot_id
                )));
            }
        }

        Ok(StrataTable {
            name: self.name,
            schemas: self.schemas,
            current_schema_id,
            specs,
            default_spec_id,
            snapshots,
            current_snapshot_id,
            refs: self.refs,
            properties: self.properties,
        })
    }
}
