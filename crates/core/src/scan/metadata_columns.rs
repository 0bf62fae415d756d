//! Synthetic metadata columns and their field-id assignment.
//!
//! Metadata columns live outside the table schema and use reserved ids from
//! the top of the i32 range. The partition metadata column nests one field
//! per partition column ever defined on the table; those nested ids are
//! reassigned on every plan build so they can never collide with a field id
//! used by any historical schema version.

use std::collections::HashSet;

use itertools::Itertools;

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{DataType, Schema, StructField, StructType};
use crate::table::StrataTable;

/// Reserved field id of the file-path metadata column.
pub const FILE_PATH_COLUMN_ID: i32 = i32::MAX - 1;
/// Reserved field id of the row-position metadata column.
pub const ROW_POSITION_COLUMN_ID: i32 = i32::MAX - 2;
/// Reserved field id of the is-deleted metadata column.
pub const IS_DELETED_COLUMN_ID: i32 = i32::MAX - 3;
/// Reserved field id of the partition-spec-id metadata column.
pub const SPEC_ID_COLUMN_ID: i32 = i32::MAX - 4;
/// Reserved field id of the partition-value metadata column.
pub const PARTITION_COLUMN_ID: i32 = i32::MAX - 5;

/// Name of the file-path metadata column.
pub const FILE_PATH_COLUMN: &str = "_file";
/// Name of the row-position metadata column.
pub const ROW_POSITION_COLUMN: &str = "_pos";
/// Name of the is-deleted metadata column.
pub const IS_DELETED_COLUMN: &str = "_deleted";
/// Name of the partition-spec-id metadata column.
pub const SPEC_ID_COLUMN: &str = "_spec_id";
/// Name of the partition-value metadata column.
pub const PARTITION_COLUMN: &str = "_partition";

/// Whether the given projection name refers to a metadata column.
pub fn is_metadata_column(name: &str) -> bool {
    matches!(
        name,
        FILE_PATH_COLUMN | ROW_POSITION_COLUMN | IS_DELETED_COLUMN | SPEC_ID_COLUMN
            | PARTITION_COLUMN
    )
}

/// Resolve one metadata column against the table.
pub fn metadata_column(table: &StrataTable, name: &str) -> StrataResult<StructField> {
    match name {
        FILE_PATH_COLUMN => Ok(StructField::not_null(
            FILE_PATH_COLUMN_ID,
            FILE_PATH_COLUMN,
            DataType::STRING,
        )),
        ROW_POSITION_COLUMN => Ok(StructField::not_null(
            ROW_POSITION_COLUMN_ID,
            ROW_POSITION_COLUMN,
            DataType::LONG,
        )),
        IS_DELETED_COLUMN => Ok(StructField::not_null(
            IS_DELETED_COLUMN_ID,
            IS_DELETED_COLUMN,
            DataType::BOOLEAN,
        )),
        SPEC_ID_COLUMN => Ok(StructField::not_null(
            SPEC_ID_COLUMN_ID,
            SPEC_ID_COLUMN,
            DataType::INTEGER,
        )),
        PARTITION_COLUMN => Ok(StructField::new(
            PARTITION_COLUMN_ID,
            PARTITION_COLUMN,
            DataType::Struct(Box::new(partition_struct(table)?)),
        )),
        other => Err(StrataTableError::InvalidProjection(other.to_string())),
    }
}

/// The union of partition layouts across every spec in the table's history,
/// keyed by partition field id.
fn partition_struct(table: &StrataTable) -> StrataResult<StructType> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for spec in table.specs() {
        for partition_field in &spec.fields {
            if !seen.insert(partition_field.field_id) {
                continue;
            }
            // the source column may only exist in an older schema version
            let source = table
                .schemas()
                .find_map(|schema| schema.field_by_id(partition_field.source_id));
            let Some(source) = source else {
                continue;
            };
            fields.push(StructField::new(
                partition_field.field_id,
                partition_field.name.clone(),
                partition_field.transform.result_type(&source.data_type),
            ));
        }
    }
    Ok(StructType::new(fields))
}

/// Build the schema fragment for the requested metadata columns,
/// deduplicating names and reassigning the partition struct's nested ids
/// away from every id the table has ever used.
pub fn metadata_schema(table: &StrataTable, names: &[String]) -> StrataResult<Schema> {
    let fields = names
        .iter()
        .unique()
        .map(|name| metadata_column(table, name))
        .collect::<StrataResult<Vec<_>>>()?;

    // only reassignment of nested partition ids needs the full id history
    if !fields.iter().any(|f| f.id == PARTITION_COLUMN_ID) {
        return Ok(Schema::new(fields));
    }

    let mut used: HashSet<i32> = fields.iter().map(|f| f.id).collect();
    for schema in table.schemas() {
        used.extend(schema.field_ids());
    }

    let mut next = 1;
    let fields = fields
        .into_iter()
        .map(|field| {
            let StructField {
                id,
                name,
                data_type,
                nullable,
            } = field;
            let data_type = match (id, data_type) {
                (PARTITION_COLUMN_ID, DataType::Struct(inner)) => {
                    let reassigned = inner
                        .fields()
                        .map(|nested| {
                            let mut candidate = next;
                            while used.contains(&candidate) {
                                candidate += 1;
                            }
                            next = candidate + 1;
                            StructField {
                                id: candidate,
                                ..nested.clone()
                            }
                        })
                        .collect();
                    DataType::Struct(Box::new(StructType::new(reassigned)))
                }
                (_, other) => other,
            };
            StructField {
                id,
                name,
                data_type,
                nullable,
            }
        })
        .collect();
    Ok(Schema::new(fields))
}
