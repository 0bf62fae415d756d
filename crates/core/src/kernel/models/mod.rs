//! The metadata data model scan planning operates on.
//!
//! Everything in this module is assumed to be parsed from the on-disk table
//! metadata by a catalog/loader collaborator before planning starts. All
//! types are immutable values from the planner's point of view.

use std::collections::HashMap;

use chrono::{Datelike, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{DataType, Scalar, Schema, StructField, StructType};

/// The kind of change a snapshot committed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOperation {
    /// Only data files were added.
    Append,
    /// Data files were added and logically replaced existing rows.
    Overwrite,
    /// Data or delete files were added to remove rows.
    Delete,
    /// Files were rewritten without changing table content.
    Replace,
}

/// An immutable node in a table's linked snapshot history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unique id of this snapshot.
    pub snapshot_id: i64,
    /// Id of the snapshot this one was committed on top of, `None` for the root.
    pub parent_id: Option<i64>,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// The kind of change this snapshot committed.
    pub operation: SnapshotOperation,
    /// Id of the schema version current when this snapshot was committed.
    pub schema_id: Option<i32>,
    /// Location of the manifest list describing this snapshot's file set.
    pub manifest_list: String,
    /// Free-form summary properties recorded at commit time.
    #[serde(default)]
    pub summary: HashMap<String, String>,
}

impl Snapshot {
    /// Create a new snapshot node.
    pub fn new(
        snapshot_id: i64,
        parent_id: Option<i64>,
        timestamp_ms: i64,
        operation: SnapshotOperation,
    ) -> Self {
        Self {
            snapshot_id,
            parent_id,
            timestamp_ms,
            operation,
            schema_id: None,
            manifest_list: String::new(),
            summary: HashMap::new(),
        }
    }

    /// Set the schema version this snapshot was committed with.
    pub fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    /// Set the manifest list location.
    pub fn with_manifest_list(mut self, manifest_list: impl Into<String>) -> Self {
        self.manifest_list = manifest_list.into();
        self
    }
}

/// A named, mutable pointer into the snapshot history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// A branch: a moving head that writers advance.
    Branch,
    /// A tag: a fixed label on one snapshot.
    Tag,
}

/// A branch or tag reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    /// The referenced snapshot id.
    pub snapshot_id: i64,
    /// Whether this reference is a branch or a tag.
    pub kind: RefKind,
}

/// A transform applied to a source column to derive a partition value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// The source value itself.
    Identity,
    /// A hash bucket of the source value, modulo the given count.
    Bucket(u32),
    /// The source value truncated to the given width.
    Truncate(u32),
    /// Years since 1970 of a date/timestamp value.
    Year,
    /// Months since 1970-01 of a date/timestamp value.
    Month,
    /// Days since the epoch of a date/timestamp value.
    Day,
    /// Hours since the epoch of a timestamp value.
    Hour,
}

impl Transform {
    /// Returns true for the identity transform.
    pub fn is_identity(&self) -> bool {
        matches!(self, Transform::Identity)
    }

    /// Returns true when the transform preserves the ordering of its source
    /// values, which lets range predicates prune on transformed values.
    pub fn preserves_order(&self) -> bool {
        !matches!(self, Transform::Bucket(_))
    }

    /// The value type this transform produces from the given source type.
    pub fn result_type(&self, source: &DataType) -> DataType {
        match self {
            Transform::Identity | Transform::Truncate(_) => source.clone(),
            Transform::Bucket(_) => DataType::INTEGER,
            Transform::Year | Transform::Month | Transform::Hour => DataType::INTEGER,
            Transform::Day => DataType::Primitive(crate::kernel::PrimitiveType::Date),
        }
    }

    /// Apply this transform to a literal value.
    ///
    /// Returns `None` when the transform cannot be applied on the planner
    /// side (bucket hashing, or a value outside the transform's domain);
    /// callers must treat `None` as "cannot prune".
    pub fn apply(&self, value: &Scalar) -> Option<Scalar> {
        if value.is_null() {
            return Some(value.clone());
        }
        match self {
            Transform::Identity => Some(value.clone()),
            Transform::Bucket(_) => None,
            Transform::Truncate(width) => match value {
                Scalar::String(s) => Some(Scalar::String(
                    s.chars().take(*width as usize).collect::<String>(),
                )),
                Scalar::Integer(v) => {
                    Some(Scalar::Integer(v - v.rem_euclid(*width as i32)))
                }
                Scalar::Long(v) => Some(Scalar::Long(v - v.rem_euclid(*width as i64))),
                _ => None,
            },
            Transform::Year => date_time_parts(value).map(|(year, _, _)| {
                Scalar::Integer(year - 1970)
            }),
            Transform::Month => date_time_parts(value).map(|(year, month, _)| {
                Scalar::Integer((year - 1970) * 12 + month as i32 - 1)
            }),
            Transform::Day => match value {
                Scalar::Date(days) => Some(Scalar::Date(*days)),
                Scalar::Timestamp(micros) => {
                    Some(Scalar::Date(micros.div_euclid(86_400_000_000) as i32))
                }
                _ => None,
            },
            Transform::Hour => match value {
                Scalar::Timestamp(micros) => {
                    Some(Scalar::Integer(micros.div_euclid(3_600_000_000) as i32))
                }
                _ => None,
            },
        }
    }
}

/// Calendar (year, month, day) of a date or timestamp scalar.
fn date_time_parts(value: &Scalar) -> Option<(i32, u32, u32)> {
    match value {
        Scalar::Date(days) => {
            let date = Utc.timestamp_opt(*days as i64 * 86_400, 0).single()?;
            Some((date.year(), date.month(), date.day()))
        }
        Scalar::Timestamp(micros) => {
            let ts = Utc.timestamp_micros(*micros).single()?;
            Some((ts.year(), ts.month(), ts.day()))
        }
        _ => None,
    }
}

/// One derived partition column of a partition spec.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionField {
    /// Field id of the source column in the table schema.
    pub source_id: i32,
    /// Field id of this partition column itself.
    pub field_id: i32,
    /// Name of the partition column.
    pub name: String,
    /// Transform deriving the partition value from the source column.
    pub transform: Transform,
}

/// A versioned mapping from source columns to partition values.
///
/// Specs are never mutated once created, only superseded by a spec with a
/// higher id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    /// Unique id of this spec within the table.
    pub spec_id: i32,
    /// The derived partition columns, in declaration order.
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The unpartitioned spec with the given id.
    pub fn unpartitioned(spec_id: i32) -> Self {
        Self {
            spec_id,
            fields: Vec::new(),
        }
    }

    /// Returns true when this spec derives at least one partition column.
    pub fn is_partitioned(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Find the partition field derived from the given source column.
    pub fn field_for_source(&self, source_id: i32) -> Option<&PartitionField> {
        self.fields.iter().find(|f| f.source_id == source_id)
    }

    /// The struct type of partition tuples written under this spec.
    pub fn partition_type(&self, schema: &Schema) -> StrataResult<StructType> {
        let fields = self
            .fields
            .iter()
            .map(|field| {
                let source = schema.field_by_id(field.source_id).ok_or_else(|| {
                    StrataTableError::MetadataError(format!(
                        "partition field '{}' references unknown source field {}",
                        field.name, field.source_id
                    ))
                })?;
                Ok(StructField::new(
                    field.field_id,
                    field.name.clone(),
                    field.transform.result_type(&source.data_type),
                ))
            })
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(StructType::new(fields))
    }
}

/// The role of a delete file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteContent {
    /// Row positions within specific data files.
    Position,
    /// Rows matching a set of column values.
    Equality,
}

/// A file holding row-level deletes layered over data files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFile {
    /// Location of the delete file.
    pub path: String,
    /// Whether the file holds positional or equality deletes.
    pub content: DeleteContent,
    /// Number of delete records in the file.
    pub record_count: i64,
    /// Size of the file in bytes.
    pub file_size_bytes: i64,
}

/// A data file belonging to exactly one partition, with decoded per-column
/// statistics keyed by field id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    /// Location of the data file.
    pub path: String,
    /// Id of the partition spec this file was written under.
    pub spec_id: i32,
    /// Partition values keyed by partition field name, in spec order.
    #[serde(default)]
    pub partition: IndexMap<String, Scalar>,
    /// Number of rows in the file.
    pub record_count: i64,
    /// Size of the file in bytes.
    pub file_size_bytes: i64,
    /// Per-column value counts (nulls included), keyed by field id.
    #[serde(default)]
    pub value_counts: HashMap<i32, i64>,
    /// Per-column null value counts, keyed by field id.
    #[serde(default)]
    pub null_value_counts: HashMap<i32, i64>,
    /// Per-column lower bounds, keyed by field id.
    #[serde(default)]
    pub lower_bounds: HashMap<i32, Scalar>,
    /// Per-column upper bounds, keyed by field id.
    #[serde(default)]
    pub upper_bounds: HashMap<i32, Scalar>,
}

impl DataFile {
    /// Create a data file record with no statistics.
    pub fn new(path: impl Into<String>, spec_id: i32, record_count: i64, size: i64) -> Self {
        Self {
            path: path.into(),
            spec_id,
            partition: IndexMap::new(),
            record_count,
            file_size_bytes: size,
            value_counts: HashMap::new(),
            null_value_counts: HashMap::new(),
            lower_bounds: HashMap::new(),
            upper_bounds: HashMap::new(),
        }
    }

    /// Set a partition value.
    pub fn with_partition_value(mut self, name: impl Into<String>, value: Scalar) -> Self {
        self.partition.insert(name.into(), value);
        self
    }

    /// Record value/null counts for a column.
    pub fn with_counts(mut self, field_id: i32, values: i64, nulls: i64) -> Self {
        self.value_counts.insert(field_id, values);
        self.null_value_counts.insert(field_id, nulls);
        self
    }

    /// Record lower/upper bounds for a column.
    pub fn with_bounds(mut self, field_id: i32, lower: Scalar, upper: Scalar) -> Self {
        self.lower_bounds.insert(field_id, lower);
        self.upper_bounds.insert(field_id, upper);
        self
    }
}

/// One data file as listed by a snapshot's manifests, together with the
/// delete files that apply to it and the snapshot that added it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// The data file.
    pub data_file: DataFile,
    /// Row-level delete files layered over the data file.
    #[serde(default)]
    pub delete_files: Vec<DeleteFile>,
    /// Id of the snapshot whose commit added the data file.
    pub added_snapshot_id: i64,
}

impl ManifestEntry {
    /// An entry with no associated delete files.
    pub fn new(data_file: DataFile, added_snapshot_id: i64) -> Self {
        Self {
            data_file,
            delete_files: Vec::new(),
            added_snapshot_id,
        }
    }

    /// Attach a delete file to this entry.
    pub fn with_delete_file(mut self, delete_file: DeleteFile) -> Self {
        self.delete_files.push(delete_file);
        self
    }
}
