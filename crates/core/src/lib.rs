//! Scan planning for Stratalake tables in Rust
//!
//! Stratalake tables are immutable, versioned collections of data files.
//! This crate turns a logical read request (projection, filters, aggregate
//! pushdown, time-travel/incremental/changelog selectors, split sizing) into
//! a concrete, reproducible [`scan::ScanPlan`] over one table state: which
//! files to read, which byte ranges, which predicates remain for the reader,
//! and which statistics summarize the plan.
//!
//! # Usage
//!
//! Plan a filtered batch scan over a table's current snapshot:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use stratalake_core::errors::StrataResult;
//! use stratalake_core::kernel::{
//!     DataType, ManifestEntry, Predicate, Schema, Snapshot, SnapshotOperation, StructField,
//! };
//! use stratalake_core::scan::ScanBuilder;
//! use stratalake_core::table::{ManifestSource, StrataTable};
//!
//! struct EmptySource;
//!
//! impl ManifestSource for EmptySource {
//!     fn files(&self, _: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
//!         Ok(Vec::new())
//!     }
//!     fn added_files(&self, _: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
//!         Ok(Vec::new())
//!     }
//!     fn removed_files(&self, _: &Snapshot) -> StrataResult<Vec<ManifestEntry>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let table = StrataTable::builder("events")
//!     .with_schema(
//!         0,
//!         Schema::new(vec![StructField::not_null(1, "id", DataType::LONG)]),
//!     )
//!     .with_snapshot(Snapshot::new(1, None, 1_700_000_000_000, SnapshotOperation::Append))
//!     .build()?;
//!
//! let plan = ScanBuilder::new(Arc::new(table), Arc::new(EmptySource))
//!     .with_filter(Predicate::try_from(("id", ">", "100"))?)
//!     .build()?;
//! assert!(plan.tasks().is_empty());
//! # Ok::<(), stratalake_core::errors::StrataTableError>(())
//! ```
//!
//! Scan modes beyond the point-in-time batch scan:
//!
//! - [`scan::ScanBuilder::with_start_snapshot_id`] plans an
//!   incremental-append scan over the files added between two snapshots.
//! - [`scan::ScanBuilder::build_changelog`] plans a changelog scan reporting
//!   inserted and deleted rows between two snapshots or timestamps.
//! - [`scan::ScanBuilder::build_merge_on_read`] and
//!   [`scan::ScanBuilder::build_copy_on_write`] pin the scanned snapshot for
//!   commit-conflict validation by the write path.
//! - [`scan::ScanBuilder::with_aggregation`] answers `COUNT`/`MIN`/`MAX`
//!   from file statistics when feasible, falling back to a normal scan.

#![deny(missing_docs)]

pub mod errors;
pub mod kernel;
pub mod scan;
pub mod table;

#[cfg(test)]
pub mod test_utils;

pub use self::errors::{StrataResult, StrataTableError};
pub use self::kernel::schema::{DataType, PrimitiveType, Schema, SchemaRef, StructField, StructType};
pub use self::scan::{ScanBuilder, ScanPlan};
pub use self::table::config::TableProperty;
pub use self::table::{ManifestSource, ManifestSourceRef, StrataTable, StrataTableBuilder};

/// Returns rust crate version, can be use used in language bindings to expose Rust core version
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
