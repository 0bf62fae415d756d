//! Error types for the stratalake crate

use crate::kernel::DataType;

/// A result returned by stratalake
pub type StrataResult<T> = Result<T, StrataTableError>;

/// Stratalake table specific error
#[allow(missing_docs)]
#[derive(thiserror::Error, Debug)]
pub enum StrataTableError {
    /// Error returned when a scan request combines selectors that exclude each other.
    #[error("Invalid scan options: {reason}")]
    InvalidScanOptions {
        /// Why the combination of scan options is rejected.
        reason: String,
    },

    /// Error returned when an explicitly requested snapshot id is not in the table history.
    #[error("Cannot find snapshot with id {0}")]
    SnapshotNotFound(i64),

    /// Error returned when no snapshot is old enough for an as-of-timestamp request.
    #[error("Cannot find a snapshot older than {timestamp_ms} ms")]
    NoSnapshotAsOf {
        /// The requested point in time, in milliseconds since the Unix epoch.
        timestamp_ms: i64,
    },

    /// Error returned when a named branch or tag does not exist on the table.
    #[error("Cannot find ref '{0}'")]
    RefNotFound(String),

    /// Error returned when an incremental range start is not an ancestor of its end.
    #[error("Snapshot {start} is not an ancestor of snapshot {end}")]
    NotAnAncestor {
        /// The requested (exclusive) start snapshot id.
        start: i64,
        /// The requested (inclusive) end snapshot id.
        end: i64,
    },

    /// Error returned when an expression references a field the schema does not have.
    #[error("No field named '{0}' in schema")]
    UnknownField(String),

    /// Error returned when a literal cannot be parsed as the referenced column's type.
    #[error("Failed to parse value '{value}' as '{data_type}'")]
    Parse {
        /// The raw literal supplied by the caller.
        value: String,
        /// The type the literal was expected to have.
        data_type: DataType,
    },

    /// Error returned when a filter predicate is structurally malformed.
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// Error returned when a projected column name does not exist in the read schema.
    #[error("Cannot project column '{0}': not present in schema")]
    InvalidProjection(String),

    /// Error returned when table metadata violates a structural invariant.
    #[error("Table metadata is invalid: {0}")]
    MetadataError(String),

    /// Error returned when the manifest listing collaborator fails.
    #[error("Failed to list manifests: {source}")]
    ManifestSource {
        /// Source error raised by the manifest listing collaborator.
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Generic stratalake error
    #[error("Generic StrataTable error: {0}")]
    Generic(String),

    /// Generic stratalake error with an underlying source
    #[error("Generic error: {source}")]
    GenericError {
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StrataTableError {
    /// Create an [`InvalidScanOptions`](Self::InvalidScanOptions) error from a reason string.
    pub fn invalid_scan_options(reason: impl Into<String>) -> Self {
        Self::InvalidScanOptions {
            reason: reason.into(),
        }
    }
}
