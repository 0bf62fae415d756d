//! Stratalake table schema
//!
//! Schemas are ordered sets of fields. Every field carries a stable integer
//! field id that is unique across the whole table history; field ids, not
//! names, are the cross-version identity of a column.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{StrataResult, StrataTableError};

/// Type alias for a top level schema
pub type Schema = StructType;
/// Schema reference type
pub type SchemaRef = Arc<StructType>;

/// Primitive column types supported by stratalake tables.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// true or false
    Boolean,
    /// 32bit signed integer
    Integer,
    /// 64bit signed integer
    Long,
    /// 32bit floating point
    Float,
    /// 64bit floating point
    Double,
    /// Days since UNIX epoch 1970-01-01
    Date,
    /// Microsecond precision timestamp, adjusted to UTC
    Timestamp,
    /// utf-8 encoded string
    String,
    /// Arbitrary bytes
    Binary,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::String => "string",
            Self::Binary => "binary",
        };
        write!(f, "{name}")
    }
}

/// The type of a schema field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DataType {
    /// A primitive value
    Primitive(PrimitiveType),
    /// A nested struct, e.g. the synthetic partition-value column
    Struct(Box<StructType>),
}

impl DataType {
    /// Shorthand for the string primitive type.
    pub const STRING: DataType = DataType::Primitive(PrimitiveType::String);
    /// Shorthand for the long primitive type.
    pub const LONG: DataType = DataType::Primitive(PrimitiveType::Long);
    /// Shorthand for the integer primitive type.
    pub const INTEGER: DataType = DataType::Primitive(PrimitiveType::Integer);
    /// Shorthand for the boolean primitive type.
    pub const BOOLEAN: DataType = DataType::Primitive(PrimitiveType::Boolean);

    /// Create a struct type from the given fields.
    pub fn struct_type(fields: Vec<StructField>) -> Self {
        DataType::Struct(Box::new(StructType::new(fields)))
    }

    /// Returns the primitive type, if this is not a struct.
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(*p),
            DataType::Struct(_) => None,
        }
    }

    /// Returns true if this type is a string.
    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Primitive(PrimitiveType::String))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::Struct(s) => {
                write!(f, "struct<")?;
                for (idx, field) in s.fields().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A field in a schema, identified by a table-unique integer id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StructField {
    /// Stable field id, unique within the table across all schema versions.
    pub id: i32,
    /// Field name, unique within one schema version.
    pub name: String,
    /// The type of values stored in this field.
    pub data_type: DataType,
    /// Whether this field may hold null values.
    pub nullable: bool,
}

impl StructField {
    /// Create a new nullable field.
    pub fn new(id: i32, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Create a new non-nullable field.
    pub fn not_null(id: i32, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            nullable: false,
        }
    }
}

/// An ordered collection of fields; also the crate's schema representation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StructType {
    fields: Vec<StructField>,
}

impl StructType {
    /// Create a new struct type from fields, preserving declaration order.
    pub fn new(fields: Vec<StructField>) -> Self {
        Self { fields }
    }

    /// Iterate the fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter()
    }

    /// Number of top level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if this struct has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a top level field by name.
    pub fn field(&self, name: &str, case_sensitive: bool) -> Option<&StructField> {
        if case_sensitive {
            self.fields.iter().find(|f| f.name == name)
        } else {
            self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
        }
    }

    /// Look up a top level field by its field id.
    pub fn field_by_id(&self, id: i32) -> Option<&StructField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// All field ids used by this schema, including ids nested in struct fields.
    pub fn field_ids(&self) -> HashSet<i32> {
        let mut ids = HashSet::new();
        collect_field_ids(&self.fields, &mut ids);
        ids
    }

    /// Project this schema down to the named fields, preserving schema order.
    ///
    /// Returns an error when a requested name does not resolve against this
    /// schema, so callers fail before any manifest is listed.
    pub fn project<S: AsRef<str>>(&self, names: &[S], case_sensitive: bool) -> StrataResult<Self> {
        for name in names {
            if self.field(name.as_ref(), case_sensitive).is_none() {
                return Err(StrataTableError::InvalidProjection(
                    name.as_ref().to_string(),
                ));
            }
        }
        let fields = self
            .fields
            .iter()
            .filter(|field| {
                names.iter().any(|name| {
                    if case_sensitive {
                        field.name == name.as_ref()
                    } else {
                        field.name.eq_ignore_ascii_case(name.as_ref())
                    }
                })
            })
            .cloned()
            .collect();
        Ok(Self { fields })
    }

    /// Append the fields of `other` after the fields of this schema.
    pub fn join(&self, other: &StructType) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Self { fields }
    }
}

fn collect_field_ids(fields: &[StructField], ids: &mut HashSet<i32>) {
    for field in fields {
        ids.insert(field.id);
        if let DataType::Struct(inner) = &field.data_type {
            collect_field_ids(&inner.fields, ids);
        }
    }
}
