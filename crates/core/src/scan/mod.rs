//! Scan planning: turning a read request into a reproducible plan.
//!
//! A [`ScanBuilder`] collects projection, filters, an optional aggregation,
//! time-travel/incremental/changelog selectors, and split sizing overrides,
//! then assembles one of the [`ScanPlan`] variants. Planning reads only the
//! immutable [`StrataTable`] view captured at builder creation plus one
//! manifest listing pass, so the resulting plan is deterministic for a fixed
//! table state and safe to hand to concurrent consumers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{
    Aggregation, BoundPredicate, DataFile, DeleteFile, ManifestEntry, Predicate, Scalar, Schema,
    SchemaRef, Snapshot, SnapshotOperation,
};
use crate::table::{ManifestSourceRef, StrataTable};

pub mod metadata_columns;
pub mod pruning;

mod aggregates;
mod split;

use aggregates::AggregateEvaluator;
use pruning::{evaluate_partition, might_match_file, selects_partitions, PartitionMatch};

/// One file, or a byte range of one, inside a scan task.
#[derive(Debug, Clone)]
pub struct FileScanTask {
    /// The data file to read.
    pub data_file: Arc<DataFile>,
    /// Byte offset this split starts at.
    pub start: i64,
    /// Number of bytes to read from `start`.
    pub length: i64,
    /// Row-level delete files the reader must apply to this file.
    pub delete_files: Vec<DeleteFile>,
    /// Predicates the reader must still evaluate per row.
    pub residual: Arc<[Predicate]>,
}

/// A bounded unit of scan work combining one or more file splits.
#[derive(Debug, Clone)]
pub struct ScanTask {
    /// The file splits bundled into this task.
    pub files: Vec<FileScanTask>,
}

impl ScanTask {
    /// Total number of bytes this task reads.
    pub fn size_bytes(&self) -> i64 {
        self.files.iter().map(|f| f.length).sum()
    }
}

/// The kind of change a changelog row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The row was inserted by the commit.
    Insert,
    /// The row was deleted by the commit.
    Delete,
}

/// One file of changed rows between two snapshots.
#[derive(Debug, Clone)]
pub struct ChangelogScanTask {
    /// Whether rows read from the file are inserts or deletes.
    pub change_type: ChangeType,
    /// The snapshot whose commit produced the change.
    pub commit_snapshot_id: i64,
    /// Position of the commit within the changelog range, oldest first.
    pub change_ordinal: usize,
    /// The file holding the changed rows.
    pub task: FileScanTask,
}

/// Row/byte/file counts derived from the pruned file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanEstimate {
    /// Number of files the plan reads.
    pub total_files: usize,
    /// Total bytes the plan reads.
    pub total_bytes: i64,
    /// Upper bound on the number of rows produced, before residual filters
    /// and row-level deletes.
    pub estimated_rows: i64,
}

/// Whether the hosting engine should plan work locally or fan it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanningMode {
    /// Planning stays on the local node.
    #[default]
    Local,
    /// The table asked for distributed planning; local is still the
    /// fallback when the host cannot distribute.
    Distributed,
}

/// Fields shared by every plan variant.
#[derive(Debug, Clone)]
pub struct PlanBase {
    /// The schema of rows produced by this plan, metadata columns included.
    pub read_schema: SchemaRef,
    /// Predicates accepted for storage-side pruning.
    pub pushed_filters: Vec<Predicate>,
    /// Predicates the consumer must re-evaluate row by row. Together with
    /// the fully pushed-down predicates these are logically equivalent to
    /// the requested filter; nothing is silently dropped.
    pub residual_filters: Vec<Predicate>,
    /// Size summary of the pruned file list.
    pub estimate: ScanEstimate,
    /// Planning mode recorded for the hosting engine.
    pub planning_mode: PlanningMode,
}

/// A point-in-time scan of one snapshot.
#[derive(Debug, Clone)]
pub struct BatchScanPlan {
    /// Shared plan fields.
    pub base: PlanBase,
    /// The snapshot this plan reads.
    pub snapshot_id: i64,
    /// The ordered scan tasks.
    pub tasks: Vec<ScanTask>,
}

/// A scan of the files appended between two snapshots.
#[derive(Debug, Clone)]
pub struct IncrementalAppendPlan {
    /// Shared plan fields.
    pub base: PlanBase,
    /// The exclusive start of the range.
    pub start_snapshot_id: i64,
    /// The inclusive end of the range.
    pub end_snapshot_id: i64,
    /// The ordered scan tasks.
    pub tasks: Vec<ScanTask>,
}

/// A scan reporting inserted and deleted rows between two snapshots.
#[derive(Debug, Clone)]
pub struct ChangelogScanPlan {
    /// Shared plan fields.
    pub base: PlanBase,
    /// The resolved exclusive start, `None` when reading from the root.
    pub start_snapshot_id: Option<i64>,
    /// The resolved inclusive end.
    pub end_snapshot_id: i64,
    /// Changed files ordered by commit, oldest first.
    pub changes: Vec<ChangelogScanTask>,
}

/// A scan whose tasks carry row-level delete files for the reader to merge,
/// pinned to a base snapshot for later commit validation.
#[derive(Debug, Clone)]
pub struct MergeOnReadPlan {
    /// Shared plan fields.
    pub base: PlanBase,
    /// The snapshot the write path must validate against at commit time.
    pub base_snapshot_id: i64,
    /// The ordered scan tasks.
    pub tasks: Vec<ScanTask>,
}

/// A scan feeding a copy-on-write rewrite: whole files are rewritten, so
/// task-level residuals are dropped and the full filter set stays with the
/// consumer.
#[derive(Debug, Clone)]
pub struct CopyOnWritePlan {
    /// Shared plan fields.
    pub base: PlanBase,
    /// The snapshot the write path must validate against at commit time.
    pub base_snapshot_id: i64,
    /// The ordered scan tasks.
    pub tasks: Vec<ScanTask>,
}

/// A terminal plan carrying an aggregation answered from statistics alone.
#[derive(Debug, Clone)]
pub struct AggregateScanPlan {
    /// Shared plan fields; the read schema is the aggregate result schema.
    pub base: PlanBase,
    /// The snapshot the statistics were read from.
    pub snapshot_id: i64,
    /// The single precomputed result row, one value per aggregate.
    pub row: Vec<Scalar>,
}

/// A valid plan over no data at all.
#[derive(Debug, Clone)]
pub struct EmptyScanPlan {
    /// Shared plan fields.
    pub base: PlanBase,
}

/// The immutable result of scan planning.
///
/// Variants share a common capability set through [`PlanBase`]; each
/// constructor site enforces its own invariants. Plans are value types:
/// created fresh per build, never mutated afterwards, safe to share across
/// threads.
#[derive(Debug, Clone)]
pub enum ScanPlan {
    /// Point-in-time scan of one snapshot.
    Batch(BatchScanPlan),
    /// Appended files between two snapshots.
    IncrementalAppend(IncrementalAppendPlan),
    /// Inserted/deleted rows between two snapshots.
    Changelog(ChangelogScanPlan),
    /// Snapshot scan with row-level deletes for the reader to merge.
    MergeOnRead(MergeOnReadPlan),
    /// Snapshot scan feeding a whole-file rewrite.
    CopyOnWrite(CopyOnWritePlan),
    /// Aggregation answered from statistics, bypassing task generation.
    Aggregate(AggregateScanPlan),
    /// A valid scan over no data.
    Empty(EmptyScanPlan),
}

impl ScanPlan {
    fn base(&self) -> &PlanBase {
        match self {
            ScanPlan::Batch(p) => &p.base,
            ScanPlan::IncrementalAppend(p) => &p.base,
            ScanPlan::Changelog(p) => &p.base,
            ScanPlan::MergeOnRead(p) => &p.base,
            ScanPlan::CopyOnWrite(p) => &p.base,
            ScanPlan::Aggregate(p) => &p.base,
            ScanPlan::Empty(p) => &p.base,
        }
    }

    /// The schema of rows produced by this plan.
    pub fn read_schema(&self) -> &SchemaRef {
        &self.base().read_schema
    }

    /// Predicates accepted for storage-side pruning.
    pub fn pushed_filters(&self) -> &[Predicate] {
        &self.base().pushed_filters
    }

    /// Predicates the consumer must re-evaluate row by row.
    pub fn residual_filters(&self) -> &[Predicate] {
        &self.base().residual_filters
    }

    /// Size summary derived from the pruned file list.
    pub fn estimate(&self) -> ScanEstimate {
        self.base().estimate
    }

    /// Planning mode recorded for the hosting engine.
    pub fn planning_mode(&self) -> PlanningMode {
        self.base().planning_mode
    }

    /// The ordered scan tasks; empty for aggregate, changelog and empty
    /// plans.
    pub fn tasks(&self) -> &[ScanTask] {
        match self {
            ScanPlan::Batch(p) => &p.tasks,
            ScanPlan::IncrementalAppend(p) => &p.tasks,
            ScanPlan::MergeOnRead(p) => &p.tasks,
            ScanPlan::CopyOnWrite(p) => &p.tasks,
            ScanPlan::Changelog(_) | ScanPlan::Aggregate(_) | ScanPlan::Empty(_) => &[],
        }
    }

    /// The snapshot this plan is pinned to, when the variant records one.
    pub fn snapshot_id(&self) -> Option<i64> {
        match self {
            ScanPlan::Batch(p) => Some(p.snapshot_id),
            ScanPlan::IncrementalAppend(p) => Some(p.end_snapshot_id),
            ScanPlan::Changelog(p) => Some(p.end_snapshot_id),
            ScanPlan::MergeOnRead(p) => Some(p.base_snapshot_id),
            ScanPlan::CopyOnWrite(p) => Some(p.base_snapshot_id),
            ScanPlan::Aggregate(p) => Some(p.snapshot_id),
            ScanPlan::Empty(_) => None,
        }
    }

    /// True for the explicit empty plan.
    pub fn is_empty(&self) -> bool {
        matches!(self, ScanPlan::Empty(_))
    }
}

/// Builder assembling a [`ScanPlan`] from a read request.
#[derive(Clone)]
pub struct ScanBuilder {
    table: Arc<StrataTable>,
    source: ManifestSourceRef,
    projection: Option<Vec<String>>,
    filters: Vec<Predicate>,
    aggregation: Option<Aggregation>,
    snapshot_id: Option<i64>,
    as_of_timestamp_ms: Option<i64>,
    branch: Option<String>,
    tag: Option<String>,
    start_snapshot_id: Option<i64>,
    end_snapshot_id: Option<i64>,
    start_timestamp_ms: Option<i64>,
    end_timestamp_ms: Option<i64>,
    case_sensitive: bool,
    split_size: Option<i64>,
    split_lookback: Option<usize>,
    split_open_file_cost: Option<i64>,
}

impl ScanBuilder {
    /// Create a builder over a table metadata view and its manifest source.
    pub fn new(table: Arc<StrataTable>, source: ManifestSourceRef) -> Self {
        Self {
            table,
            source,
            projection: None,
            filters: Vec::new(),
            aggregation: None,
            snapshot_id: None,
            as_of_timestamp_ms: None,
            branch: None,
            tag: None,
            start_snapshot_id: None,
            end_snapshot_id: None,
            start_timestamp_ms: None,
            end_timestamp_ms: None,
            case_sensitive: true,
            split_size: None,
            split_lookback: None,
            split_open_file_cost: None,
        }
    }

    /// Project the scan to the given column names; metadata column names are
    /// split out and appended to the read schema.
    pub fn with_projection(mut self, columns: Vec<String>) -> Self {
        self.projection = Some(columns);
        self
    }

    /// Add a filter predicate.
    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Replace the filter predicates.
    pub fn with_filters(mut self, predicates: Vec<Predicate>) -> Self {
        self.filters = predicates;
        self
    }

    /// Request an aggregation; pushdown is attempted and silently falls back
    /// to a normal scan when infeasible.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Scan an explicit snapshot id.
    pub fn with_snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    /// Scan the newest snapshot committed at or before the given time.
    pub fn with_as_of_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.as_of_timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Scan the head of a branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Scan a tagged snapshot.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Incremental-append: read files appended after this snapshot
    /// (exclusive).
    pub fn with_start_snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.start_snapshot_id = Some(snapshot_id);
        self
    }

    /// Incremental-append/changelog: stop at this snapshot (inclusive).
    pub fn with_end_snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.end_snapshot_id = Some(snapshot_id);
        self
    }

    /// Changelog: read changes committed after this time.
    pub fn with_start_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.start_timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Changelog: read changes committed at or before this time.
    pub fn with_end_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.end_timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Control case sensitivity of column references; on by default.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Override the target scan task size for this request.
    pub fn with_split_size(mut self, split_size: i64) -> Self {
        self.split_size = Some(split_size);
        self
    }

    /// Override the packing lookback window for this request.
    pub fn with_split_lookback(mut self, lookback: usize) -> Self {
        self.split_lookback = Some(lookback);
        self
    }

    /// Override the open file cost for this request.
    pub fn with_split_open_file_cost(mut self, open_file_cost: i64) -> Self {
        self.split_open_file_cost = Some(open_file_cost);
        self
    }

    /// Build a batch or incremental-append plan, per the request's
    /// selectors.
    pub fn build(&self) -> StrataResult<ScanPlan> {
        self.validate_batch_selectors()?;

        if let Some(start_snapshot_id) = self.start_snapshot_id {
            return self.build_incremental_append(start_snapshot_id);
        }

        let Some(snapshot) = self.resolve_batch_snapshot()? else {
            return self.empty_plan(None);
        };
        let snapshot = snapshot.clone();

        if let Some(aggregation) = &self.aggregation {
            if let Some(plan) = self.try_push_aggregation(aggregation, &snapshot)? {
                return Ok(plan);
            }
        }

        let context = self.plan_context(Some(&snapshot))?;
        let entries = self.plan_entries(&snapshot, &context.bound)?;
        let estimate = estimate_of(&entries);
        let tasks = self.make_tasks(entries, context.residual_arc(), false);
        info!(
            table = self.table.name(),
            snapshot_id = snapshot.snapshot_id,
            task_count = tasks.len(),
            "planned batch scan"
        );
        Ok(ScanPlan::Batch(BatchScanPlan {
            base: self.plan_base(context, estimate),
            snapshot_id: snapshot.snapshot_id,
            tasks,
        }))
    }

    /// Build a changelog plan over the requested snapshot/timestamp range.
    pub fn build_changelog(&self) -> StrataResult<ScanPlan> {
        if self.snapshot_id.is_some()
            || self.as_of_timestamp_ms.is_some()
            || self.branch.is_some()
            || self.tag.is_some()
        {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set snapshot-id, as-of-timestamp, branch or tag for changelogs",
            ));
        }
        if self.start_snapshot_id.is_some() && self.start_timestamp_ms.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set both start-snapshot-id and start-timestamp for changelogs",
            ));
        }
        if self.end_snapshot_id.is_some() && self.end_timestamp_ms.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set both end-snapshot-id and end-timestamp for changelogs",
            ));
        }
        if let (Some(start), Some(end)) = (self.start_timestamp_ms, self.end_timestamp_ms) {
            if start >= end {
                return Err(StrataTableError::invalid_scan_options(
                    "start-timestamp must be less than end-timestamp for changelogs",
                ));
            }
        }

        if let Some(start) = self.start_snapshot_id {
            if self.table.snapshot_by_id(start).is_none() {
                return Err(StrataTableError::SnapshotNotFound(start));
            }
        }

        let mut empty_scan = false;
        let mut start_snapshot_id = self.start_snapshot_id;
        let mut end_snapshot_id = self.end_snapshot_id;

        if let Some(start_ts) = self.start_timestamp_ms {
            match self.table.current_snapshot() {
                None => empty_scan = true,
                Some(current) if start_ts > current.timestamp_ms => empty_scan = true,
                Some(_) => {}
            }
            start_snapshot_id = self.changelog_start_snapshot_id(start_ts);
        }

        if let Some(end_ts) = self.end_timestamp_ms {
            end_snapshot_id = self.table.snapshot_as_of(end_ts).map(|s| s.snapshot_id);
            if (start_snapshot_id.is_none() && end_snapshot_id.is_none())
                || (start_snapshot_id.is_some() && start_snapshot_id == end_snapshot_id)
            {
                empty_scan = true;
            }
        }

        if empty_scan {
            debug!(table = self.table.name(), "changelog range is empty");
            return self.empty_plan(None);
        }

        let end_snapshot_id = match end_snapshot_id.or_else(|| {
            self.table.current_snapshot().map(|s| s.snapshot_id)
        }) {
            Some(id) => id,
            None => return self.empty_plan(None),
        };
        if self
            .table
            .snapshot_by_id(end_snapshot_id)
            .is_none()
        {
            return Err(StrataTableError::SnapshotNotFound(end_snapshot_id));
        }

        let range: Vec<Snapshot> = match start_snapshot_id {
            Some(start) => self
                .table
                .ancestors_between(start, end_snapshot_id)?
                .into_iter()
                .cloned()
                .collect(),
            None => {
                let mut all = self.table.ancestors_of(end_snapshot_id);
                all.reverse();
                all.into_iter().cloned().collect()
            }
        };

        let context = self.plan_context(range.last())?;
        let residual = context.residual_arc();
        let mut changes = Vec::new();
        let mut files = 0usize;
        let mut bytes = 0i64;
        let mut rows = 0i64;
        for (ordinal, snapshot) in range.iter().enumerate() {
            // replace commits rewrite files without changing table content
            if snapshot.operation == SnapshotOperation::Replace {
                continue;
            }
            let inserts = self.prune(self.source.added_files(snapshot)?, &context.bound);
            let deletes = match snapshot.operation {
                SnapshotOperation::Append => Vec::new(),
                _ => self.prune(self.source.removed_files(snapshot)?, &context.bound),
            };
            for (change_type, entries) in
                [(ChangeType::Insert, inserts), (ChangeType::Delete, deletes)]
            {
                for entry in entries {
                    files += 1;
                    bytes += entry.data_file.file_size_bytes;
                    rows += entry.data_file.record_count;
                    changes.push(ChangelogScanTask {
                        change_type,
                        commit_snapshot_id: snapshot.snapshot_id,
                        change_ordinal: ordinal,
                        task: file_task(entry, residual.clone()),
                    });
                }
            }
        }

        info!(
            table = self.table.name(),
            start = ?start_snapshot_id,
            end = end_snapshot_id,
            change_count = changes.len(),
            "planned changelog scan"
        );
        Ok(ScanPlan::Changelog(ChangelogScanPlan {
            base: self.plan_base(
                context,
                ScanEstimate {
                    total_files: files,
                    total_bytes: bytes,
                    estimated_rows: rows,
                },
            ),
            start_snapshot_id,
            end_snapshot_id,
            changes,
        }))
    }

    /// Build a merge-on-read plan pinned to the latest snapshot, recording
    /// it as the base for commit-conflict validation by the write path.
    pub fn build_merge_on_read(&self) -> StrataResult<ScanPlan> {
        self.validate_row_level_selectors("row-level command scans")?;

        let Some(snapshot) = self.table.latest_snapshot(self.branch.as_deref())?.cloned()
        else {
            return self.empty_plan(None);
        };

        let context = self.plan_context(Some(&snapshot))?;
        let entries = self.plan_entries(&snapshot, &context.bound)?;
        let estimate = estimate_of(&entries);
        let tasks = self.make_tasks(entries, context.residual_arc(), false);
        Ok(ScanPlan::MergeOnRead(MergeOnReadPlan {
            base: self.plan_base(context, estimate),
            base_snapshot_id: snapshot.snapshot_id,
            tasks,
        }))
    }

    /// Build a copy-on-write plan: whole matching files are handed to the
    /// rewrite, so per-task residuals are dropped.
    pub fn build_copy_on_write(&self) -> StrataResult<ScanPlan> {
        self.validate_row_level_selectors("copy-on-write scans")?;

        let Some(snapshot) = self.table.latest_snapshot(self.branch.as_deref())?.cloned()
        else {
            return self.empty_plan(None);
        };

        let context = self.plan_context(Some(&snapshot))?;
        let entries = self.plan_entries(&snapshot, &context.bound)?;
        let estimate = estimate_of(&entries);
        let tasks = self.make_tasks(entries, context.residual_arc(), true);
        Ok(ScanPlan::CopyOnWrite(CopyOnWritePlan {
            base: self.plan_base(context, estimate),
            base_snapshot_id: snapshot.snapshot_id,
            tasks,
        }))
    }

    // ---- selector validation and resolution -------------------------------

    fn validate_batch_selectors(&self) -> StrataResult<()> {
        if self.snapshot_id.is_some() && self.as_of_timestamp_ms.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set both snapshot-id and as-of-timestamp to select a table snapshot",
            ));
        }
        if self.branch.is_some() && self.tag.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set both branch and tag to select a table snapshot",
            ));
        }
        if (self.snapshot_id.is_some() || self.as_of_timestamp_ms.is_some())
            && (self.start_snapshot_id.is_some() || self.end_snapshot_id.is_some())
        {
            return Err(StrataTableError::invalid_scan_options(
                "cannot combine incremental scan options with snapshot-id or as-of-timestamp",
            ));
        }
        if self.start_snapshot_id.is_none() && self.end_snapshot_id.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "cannot set only end-snapshot-id for incremental scans; set start-snapshot-id too",
            ));
        }
        if self.start_timestamp_ms.is_some() || self.end_timestamp_ms.is_some() {
            return Err(StrataTableError::invalid_scan_options(
                "start-timestamp and end-timestamp are only valid for changelog scans",
            ));
        }
        Ok(())
    }

    fn validate_row_level_selectors(&self, kind: &str) -> StrataResult<()> {
        if self.snapshot_id.is_some() || self.as_of_timestamp_ms.is_some() || self.tag.is_some() {
            return Err(StrataTableError::invalid_scan_options(format!(
                "cannot set time travel options snapshot-id, as-of-timestamp or tag for {kind}"
            )));
        }
        if self.start_snapshot_id.is_some() || self.end_snapshot_id.is_some() {
            return Err(StrataTableError::invalid_scan_options(format!(
                "cannot set incremental scan options for {kind}"
            )));
        }
        if self.start_timestamp_ms.is_some() || self.end_timestamp_ms.is_some() {
            return Err(StrataTableError::invalid_scan_options(format!(
                "cannot set changelog timestamps for {kind}"
            )));
        }
        Ok(())
    }

    /// Resolve the Group A (point-in-time) selectors to a snapshot.
    /// `Ok(None)` means the table is empty, a valid empty scan.
    fn resolve_batch_snapshot(&self) -> StrataResult<Option<&Snapshot>> {
        if let Some(snapshot_id) = self.snapshot_id {
            return self
                .table
                .snapshot_by_id(snapshot_id)
                .map(Some)
                .ok_or(StrataTableError::SnapshotNotFound(snapshot_id));
        }
        if let Some(timestamp_ms) = self.as_of_timestamp_ms {
            return self
                .table
                .snapshot_as_of(timestamp_ms)
                .map(Some)
                .ok_or(StrataTableError::NoSnapshotAsOf { timestamp_ms });
        }
        if let Some(tag) = &self.tag {
            return self.table.resolve_ref(tag).map(Some);
        }
        if let Some(branch) = &self.branch {
            return self.table.resolve_ref(branch).map(Some);
        }
        Ok(self.table.current_snapshot())
    }

    /// The exclusive changelog start for a start-timestamp: the oldest
    /// ancestor committed at or after the timestamp when it is an exact
    /// match, otherwise that ancestor's parent. The asymmetry with the
    /// end-timestamp rule is a fixed contract; changing it silently changes
    /// which commits are included.
    fn changelog_start_snapshot_id(&self, start_ts: i64) -> Option<i64> {
        let oldest_after = self.table.oldest_ancestor_after(start_ts)?;
        if oldest_after.timestamp_ms == start_ts {
            Some(oldest_after.snapshot_id)
        } else {
            oldest_after.parent_id
        }
    }

    // ---- incremental append ----------------------------------------------

    fn build_incremental_append(&self, start_snapshot_id: i64) -> StrataResult<ScanPlan> {
        if self.table.snapshot_by_id(start_snapshot_id).is_none() {
            return Err(StrataTableError::SnapshotNotFound(start_snapshot_id));
        }
        let end_snapshot_id = match self.end_snapshot_id {
            Some(id) => {
                if self.table.snapshot_by_id(id).is_none() {
                    return Err(StrataTableError::SnapshotNotFound(id));
                }
                id
            }
            None => match self.table.current_snapshot() {
                Some(current) => current.snapshot_id,
                None => return self.empty_plan(None),
            },
        };

        let range: Vec<Snapshot> = self
            .table
            .ancestors_between(start_snapshot_id, end_snapshot_id)?
            .into_iter()
            .cloned()
            .collect();

        let context = self.plan_context(range.last())?;
        let mut entries = Vec::new();
        for snapshot in &range {
            // only appends contribute; overwrites and deletes change rows,
            // which an append-only scan must not observe
            if snapshot.operation != SnapshotOperation::Append {
                continue;
            }
            entries.extend(self.prune(self.source.added_files(snapshot)?, &context.bound));
        }
        let estimate = estimate_of(&entries);
        let tasks = self.make_tasks(entries, context.residual_arc(), false);
        info!(
            table = self.table.name(),
            start = start_snapshot_id,
            end = end_snapshot_id,
            task_count = tasks.len(),
            "planned incremental append scan"
        );
        Ok(ScanPlan::IncrementalAppend(IncrementalAppendPlan {
            base: self.plan_base(context, estimate),
            start_snapshot_id,
            end_snapshot_id,
            tasks,
        }))
    }

    // ---- aggregate pushdown ----------------------------------------------

    /// Attempt to answer the aggregation from file statistics. Returns
    /// `Ok(None)` whenever pushdown is infeasible; only invalid requests
    /// propagate as errors.
    fn try_push_aggregation(
        &self,
        aggregation: &Aggregation,
        snapshot: &Snapshot,
    ) -> StrataResult<Option<ScanPlan>> {
        if !aggregation.group_by.is_empty() {
            info!("skipping aggregate pushdown: group by aggregation push down is not supported");
            return Ok(None);
        }
        if !self.table.config().aggregate_pushdown_enabled() {
            info!("skipping aggregate pushdown: disabled by table configuration");
            return Ok(None);
        }

        let schema = self.table.schema_for_snapshot(snapshot).clone();
        let mut bound = Vec::with_capacity(aggregation.aggregates.len());
        for aggregate in &aggregation.aggregates {
            match aggregate.bind(&schema, self.case_sensitive) {
                Ok(b) => bound.push(b),
                Err(err) => {
                    info!("skipping aggregate pushdown: bind failed for {aggregate}: {err}");
                    return Ok(None);
                }
            }
        }
        if !aggregates::metrics_modes_support(&bound, &self.table.config()) {
            return Ok(None);
        }

        let context = self.plan_context(Some(snapshot))?;
        let entries = match self.source.files(snapshot) {
            Ok(entries) => entries,
            Err(err) => {
                // pushdown must not surface listing failures; the normal
                // scan that follows will
                warn!("skipping aggregate pushdown: {err}");
                return Ok(None);
            }
        };

        let mut evaluator = AggregateEvaluator::new(bound);
        let mut files = 0usize;
        let mut bytes = 0i64;
        for entry in self.prune(entries, &context.bound) {
            if !entry.delete_files.is_empty() {
                info!("skipping aggregate pushdown: detected row level deletes");
                return Ok(None);
            }
            files += 1;
            bytes += entry.data_file.file_size_bytes;
            evaluator.update(&entry.data_file);
        }
        if !evaluator.all_valid() {
            info!("skipping aggregate pushdown: incomplete statistics for an aggregate");
            return Ok(None);
        }

        let (result_schema, row) = evaluator.result();
        info!(
            table = self.table.name(),
            snapshot_id = snapshot.snapshot_id,
            "answered aggregation from file statistics"
        );
        Ok(Some(ScanPlan::Aggregate(AggregateScanPlan {
            base: PlanBase {
                read_schema: Arc::new(result_schema),
                pushed_filters: context.pushed,
                residual_filters: context.residual,
                estimate: ScanEstimate {
                    total_files: files,
                    total_bytes: bytes,
                    estimated_rows: 1,
                },
                planning_mode: self.planning_mode(),
            },
            snapshot_id: snapshot.snapshot_id,
            row,
        })))
    }

    // ---- shared planning machinery ---------------------------------------

    fn planning_mode(&self) -> PlanningMode {
        if self.table.config().distributed_planning_enabled() {
            PlanningMode::Distributed
        } else {
            PlanningMode::Local
        }
    }

    /// Bind filters, classify them into pushed/residual sets, and resolve
    /// the read schema (projection plus metadata columns).
    fn plan_context(&self, snapshot: Option<&Snapshot>) -> StrataResult<PlanContext> {
        let schema = match snapshot {
            Some(snapshot) => self.table.schema_for_snapshot(snapshot).clone(),
            None => self.table.schema().clone(),
        };

        let mut bound = Vec::new();
        let mut pushed = Vec::new();
        let mut residual = Vec::new();
        for predicate in &self.filters {
            match predicate.bind(&schema, self.case_sensitive) {
                Ok(bound_predicate) => {
                    let complete = selects_partitions(&bound_predicate, self.table.as_ref());
                    pushed.push(predicate.clone());
                    bound.push(bound_predicate);
                    if complete {
                        info!("evaluating completely on the storage side: {predicate}");
                    } else {
                        residual.push(predicate.clone());
                    }
                }
                Err(err) => {
                    warn!("failed to check if {predicate} can be pushed down: {err}");
                    residual.push(predicate.clone());
                }
            }
        }

        let read_schema = self.read_schema(&schema, &pushed)?;
        Ok(PlanContext {
            read_schema: Arc::new(read_schema),
            bound,
            pushed,
            residual,
        })
    }

    /// The schema of rows this scan produces: the projected data columns
    /// (always including columns referenced by pushable filters) joined with
    /// the requested metadata columns.
    fn read_schema(&self, schema: &Schema, pushed: &[Predicate]) -> StrataResult<Schema> {
        let Some(projection) = &self.projection else {
            return Ok(schema.clone());
        };

        let mut data_columns: Vec<String> = Vec::new();
        let mut meta_columns: Vec<String> = Vec::new();
        for name in projection {
            if metadata_columns::is_metadata_column(name) {
                meta_columns.push(name.clone());
            } else {
                data_columns.push(name.clone());
            }
        }
        // filter columns come back to the caller for residual evaluation
        for predicate in pushed {
            let present = data_columns.iter().any(|c| {
                if self.case_sensitive {
                    c == &predicate.column
                } else {
                    c.eq_ignore_ascii_case(&predicate.column)
                }
            });
            if !present && schema.field(&predicate.column, self.case_sensitive).is_some() {
                data_columns.push(predicate.column.clone());
            }
        }

        let projected = schema.project(&data_columns, self.case_sensitive)?;
        let metadata = metadata_columns::metadata_schema(self.table.as_ref(), &meta_columns)?;
        Ok(projected.join(&metadata))
    }

    /// One manifest listing pass with partition and statistics pruning
    /// applied. Listing failures here are hard errors.
    fn plan_entries(
        &self,
        snapshot: &Snapshot,
        bound: &[BoundPredicate],
    ) -> StrataResult<Vec<ManifestEntry>> {
        let entries = self.source.files(snapshot)?;
        Ok(self.prune(entries, bound))
    }

    fn prune(
        &self,
        entries: Vec<ManifestEntry>,
        bound: &[BoundPredicate],
    ) -> Vec<ManifestEntry> {
        if bound.is_empty() {
            return entries;
        }
        let total = entries.len();
        let kept: Vec<ManifestEntry> = entries
            .into_iter()
            .filter(|entry| {
                let file = &entry.data_file;
                if let Some(spec) = self.table.spec_by_id(file.spec_id) {
                    if evaluate_partition(bound, spec, file) == PartitionMatch::SelectsNone {
                        return false;
                    }
                }
                might_match_file(bound, file)
            })
            .collect();
        debug!(
            table = self.table.name(),
            total,
            kept = kept.len(),
            "pruned manifest entries"
        );
        kept
    }

    fn make_tasks(
        &self,
        entries: Vec<ManifestEntry>,
        residual: Arc<[Predicate]>,
        ignore_residuals: bool,
    ) -> Vec<ScanTask> {
        let residual = if ignore_residuals {
            Arc::from(Vec::new().into_boxed_slice())
        } else {
            residual
        };
        let files = entries
            .into_iter()
            .map(|entry| file_task(entry, residual.clone()))
            .collect();
        let config = self.table.config();
        split::plan_tasks(
            files,
            self.split_size.unwrap_or_else(|| config.split_size()),
            self.split_lookback
                .unwrap_or_else(|| config.split_lookback()),
            self.split_open_file_cost
                .unwrap_or_else(|| config.split_open_file_cost()),
        )
    }

    fn plan_base(&self, context: PlanContext, estimate: ScanEstimate) -> PlanBase {
        PlanBase {
            read_schema: context.read_schema,
            pushed_filters: context.pushed,
            residual_filters: context.residual,
            estimate,
            planning_mode: self.planning_mode(),
        }
    }

    fn empty_plan(&self, snapshot: Option<&Snapshot>) -> StrataResult<ScanPlan> {
        let context = self.plan_context(snapshot)?;
        Ok(ScanPlan::Empty(EmptyScanPlan {
            base: self.plan_base(context, ScanEstimate::default()),
        }))
    }
}

/// Bound filter classification plus the resolved read schema for one build.
struct PlanContext {
    read_schema: SchemaRef,
    bound: Vec<BoundPredicate>,
    pushed: Vec<Predicate>,
    residual: Vec<Predicate>,
}

impl PlanContext {
    fn residual_arc(&self) -> Arc<[Predicate]> {
        self.residual.clone().into()
    }
}

fn file_task(entry: ManifestEntry, residual: Arc<[Predicate]>) -> FileScanTask {
    let length = entry.data_file.file_size_bytes;
    FileScanTask {
        data_file: Arc::new(entry.data_file),
        start: 0,
        length,
        delete_files: entry.delete_files,
        residual,
    }
}

fn estimate_of(entries: &[ManifestEntry]) -> ScanEstimate {
    ScanEstimate {
        total_files: entries.len(),
        total_bytes: entries.iter().map(|e| e.data_file.file_size_bytes).sum(),
        estimated_rows: entries.iter().map(|e| e.data_file.record_count).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Aggregate, DataType, DeleteContent, StructField};
    use crate::table::config::{TableProperty, METRICS_MODE_COLUMN_CONF_PREFIX};
    use crate::test_utils::{category_file, category_spec, test_schema, TestSource};

    fn predicate(filter: (&str, &str, &str)) -> Predicate {
        Predicate::try_from(filter).unwrap()
    }

    /// Two partitions: snapshot 1 appends 10 files to category A, snapshot 2
    /// appends 5 files to category B.
    fn two_partition_table() -> (Arc<StrataTable>, Arc<TestSource>) {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_partition_spec(category_spec())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(2, Some(1), 200, SnapshotOperation::Append))
            .with_current_snapshot_id(2)
            .build()
            .unwrap();

        let a_files: Vec<ManifestEntry> = (0..10)
            .map(|i| {
                ManifestEntry::new(
                    category_file(&format!("a-{i}.parquet"), "A", 100, i * 100, i * 100 + 99),
                    1,
                )
            })
            .collect();
        let b_files: Vec<ManifestEntry> = (0..5)
            .map(|i| {
                ManifestEntry::new(
                    category_file(&format!("b-{i}.parquet"), "B", 100, 5000 + i, 5000 + i),
                    2,
                )
            })
            .collect();
        let all: Vec<ManifestEntry> = a_files.iter().chain(b_files.iter()).cloned().collect();

        let source = TestSource::new()
            .with_files(1, a_files.clone())
            .with_files(2, all)
            .with_added(1, a_files)
            .with_added(2, b_files);
        (Arc::new(table), Arc::new(source))
    }

    fn file_count(plan: &ScanPlan) -> usize {
        plan.tasks().iter().map(|t| t.files.len()).sum()
    }

    #[test]
    fn test_batch_scan_full_partition_pruning() {
        let (table, source) = two_partition_table();
        let plan = ScanBuilder::new(table, source)
            .with_filter(predicate(("category", "=", "A")))
            .build()
            .unwrap();

        assert!(matches!(plan, ScanPlan::Batch(_)));
        assert_eq!(plan.snapshot_id(), Some(2));
        assert_eq!(file_count(&plan), 10);
        // the predicate is answered entirely by partition values
        assert!(plan.residual_filters().is_empty());
        assert_eq!(plan.pushed_filters().len(), 1);
        assert_eq!(plan.estimate().total_files, 10);
        assert_eq!(plan.estimate().estimated_rows, 1000);
    }

    #[test]
    fn test_batch_scan_unpartitioned_demotes_to_residual() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .build()
            .unwrap();
        let files: Vec<ManifestEntry> = (0..15)
            .map(|i| {
                ManifestEntry::new(
                    category_file(
                        &format!("f-{i}.parquet"),
                        if i < 10 { "A" } else { "B" },
                        100,
                        0,
                        99,
                    ),
                    1,
                )
            })
            .collect();
        let source = TestSource::new().with_files(1, files);

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_filter(predicate(("category", "=", "A")))
            .build()
            .unwrap();

        // no partition pruning possible: all files survive, the caller
        // re-evaluates the predicate per row
        assert_eq!(file_count(&plan), 15);
        assert_eq!(plan.residual_filters(), plan.pushed_filters());
        assert_eq!(plan.residual_filters().len(), 1);
    }

    #[test]
    fn test_no_predicate_is_silently_dropped() {
        let (table, source) = two_partition_table();
        let filters = vec![
            predicate(("category", "=", "A")),   // fully pushable
            predicate(("id", "<", "500")),       // prunable, stays residual
            predicate(("ghost", "=", "1")),      // unbindable
        ];
        let plan = ScanBuilder::new(table, source)
            .with_filters(filters.clone())
            .build()
            .unwrap();

        for filter in &filters {
            let pushed = plan.pushed_filters().contains(filter);
            let residual = plan.residual_filters().contains(filter);
            assert!(pushed || residual, "{filter} was dropped");
        }
        // the unbindable predicate must not be used for pruning
        assert!(!plan.pushed_filters().contains(&filters[2]));
        assert!(plan.residual_filters().contains(&filters[1]));
    }

    #[test]
    fn test_metrics_pruning_drops_files_during_planning() {
        let (table, source) = two_partition_table();
        // category A files span id ranges [0,99] .. [900,999]
        let plan = ScanBuilder::new(table, source)
            .with_filter(predicate(("category", "=", "A")))
            .with_filter(predicate(("id", ">=", "950")))
            .build()
            .unwrap();
        assert_eq!(file_count(&plan), 1);
    }

    #[test]
    fn test_selector_validation() {
        let (table, source) = two_partition_table();
        let builder = ScanBuilder::new(table, source);

        let err = builder
            .clone()
            .with_snapshot_id(1)
            .with_as_of_timestamp(150)
            .build()
            .unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));

        let err = builder
            .clone()
            .with_snapshot_id(1)
            .with_start_snapshot_id(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));

        let err = builder.clone().with_end_snapshot_id(2).build().unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));

        let err = builder.clone().with_start_timestamp(100).build().unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));

        let err = builder.with_snapshot_id(99).build().unwrap_err();
        assert!(matches!(err, StrataTableError::SnapshotNotFound(99)));
    }

    #[test]
    fn test_time_travel_selectors() {
        let (table, source) = two_partition_table();
        let builder = ScanBuilder::new(table, source);

        let plan = builder.clone().with_snapshot_id(1).build().unwrap();
        assert_eq!(plan.snapshot_id(), Some(1));
        assert_eq!(file_count(&plan), 10);

        let plan = builder.clone().with_as_of_timestamp(150).build().unwrap();
        assert_eq!(plan.snapshot_id(), Some(1));

        let err = builder.with_as_of_timestamp(50).build().unwrap_err();
        assert!(matches!(err, StrataTableError::NoSnapshotAsOf { .. }));
    }

    #[test]
    fn test_branch_and_tag_selectors() {
        let (_, source) = two_partition_table();
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_partition_spec(category_spec())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(2, Some(1), 200, SnapshotOperation::Append))
            .with_ref("audit", 1, crate::kernel::RefKind::Tag)
            .build()
            .unwrap();

        let plan = ScanBuilder::new(Arc::new(table.clone()), source.clone())
            .with_tag("audit")
            .build()
            .unwrap();
        assert_eq!(plan.snapshot_id(), Some(1));

        let err = ScanBuilder::new(Arc::new(table), source)
            .with_branch("nope")
            .build()
            .unwrap_err();
        assert!(matches!(err, StrataTableError::RefNotFound(_)));
    }

    #[test]
    fn test_empty_table_is_a_valid_scan() {
        let table = StrataTable::builder("empty")
            .with_schema(0, test_schema())
            .build()
            .unwrap();
        let plan = ScanBuilder::new(Arc::new(table), Arc::new(TestSource::new()))
            .build()
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.estimate(), ScanEstimate::default());
    }

    #[test]
    fn test_incremental_append_scan() {
        let (table, source) = two_partition_table();
        let plan = ScanBuilder::new(table, source)
            .with_start_snapshot_id(1)
            .build()
            .unwrap();

        let ScanPlan::IncrementalAppend(ref incremental) = plan else {
            panic!("expected incremental append plan")
        };
        assert_eq!(incremental.start_snapshot_id, 1);
        assert_eq!(incremental.end_snapshot_id, 2);
        // only the files appended by snapshot 2
        assert_eq!(file_count(&plan), 5);
    }

    #[test]
    fn test_incremental_append_skips_non_append_commits() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(2, Some(1), 200, SnapshotOperation::Delete))
            .with_snapshot(Snapshot::new(3, Some(2), 300, SnapshotOperation::Append))
            .build()
            .unwrap();
        let source = TestSource::new()
            .with_added(2, vec![ManifestEntry::new(
                category_file("d.parquet", "A", 10, 0, 9),
                2,
            )])
            .with_added(3, vec![ManifestEntry::new(
                category_file("a.parquet", "A", 10, 0, 9),
                3,
            )]);

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_start_snapshot_id(1)
            .build()
            .unwrap();
        let files: Vec<&str> = plan
            .tasks()
            .iter()
            .flat_map(|t| t.files.iter().map(|f| f.data_file.path.as_str()))
            .collect();
        assert_eq!(files, vec!["a.parquet"]);
    }

    fn changelog_table() -> (Arc<StrataTable>, Arc<TestSource>) {
        // snapshots at timestamps 10, 20, 30
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 10, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(2, Some(1), 20, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(3, Some(2), 30, SnapshotOperation::Append))
            .build()
            .unwrap();
        let entry = |path: &str, snapshot: i64| {
            ManifestEntry::new(category_file(path, "A", 10, 0, 9), snapshot)
        };
        let source = TestSource::new()
            .with_added(1, vec![entry("s1.parquet", 1)])
            .with_added(2, vec![entry("s2.parquet", 2)])
            .with_added(3, vec![entry("s3.parquet", 3)]);
        (Arc::new(table), Arc::new(source))
    }

    #[test]
    fn test_changelog_start_timestamp_exact_match() {
        let (table, source) = changelog_table();
        let plan = ScanBuilder::new(table, source)
            .with_start_timestamp(20)
            .build_changelog()
            .unwrap();
        let ScanPlan::Changelog(ref changelog) = plan else {
            panic!("expected changelog plan")
        };
        // exact match resolves to the snapshot at 20 itself (exclusive)
        assert_eq!(changelog.start_snapshot_id, Some(2));
        assert_eq!(changelog.end_snapshot_id, 3);
        let paths: Vec<&str> = changelog
            .changes
            .iter()
            .map(|c| c.task.data_file.path.as_str())
            .collect();
        assert_eq!(paths, vec!["s3.parquet"]);
    }

    #[test]
    fn test_changelog_start_timestamp_between_commits() {
        let (table, source) = changelog_table();
        let plan = ScanBuilder::new(table, source)
            .with_start_timestamp(25)
            .build_changelog()
            .unwrap();
        let ScanPlan::Changelog(ref changelog) = plan else {
            panic!("expected changelog plan")
        };
        // no exact match: the parent of the oldest snapshot at/after 25
        assert_eq!(changelog.start_snapshot_id, Some(2));
    }

    #[test]
    fn test_changelog_start_after_current_is_empty() {
        let (table, source) = changelog_table();
        let plan = ScanBuilder::new(table, source)
            .with_start_timestamp(31)
            .build_changelog()
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_changelog_full_history_with_end_timestamp() {
        let (table, source) = changelog_table();
        let plan = ScanBuilder::new(table, source)
            .with_start_timestamp(5)
            .with_end_timestamp(25)
            .build_changelog()
            .unwrap();
        let ScanPlan::Changelog(ref changelog) = plan else {
            panic!("expected changelog plan")
        };
        assert_eq!(changelog.start_snapshot_id, None);
        assert_eq!(changelog.end_snapshot_id, 2);
        let ordinals: Vec<(usize, i64)> = changelog
            .changes
            .iter()
            .map(|c| (c.change_ordinal, c.commit_snapshot_id))
            .collect();
        assert_eq!(ordinals, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_changelog_tags_deletes() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 10, SnapshotOperation::Append))
            .with_snapshot(Snapshot::new(2, Some(1), 20, SnapshotOperation::Delete))
            .build()
            .unwrap();
        let source = TestSource::new()
            .with_added(1, vec![ManifestEntry::new(
                category_file("s1.parquet", "A", 10, 0, 9),
                1,
            )])
            .with_removed(2, vec![ManifestEntry::new(
                category_file("s1.parquet", "A", 10, 0, 9),
                1,
            )]);

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_start_snapshot_id(1)
            .build_changelog()
            .unwrap();
        let ScanPlan::Changelog(ref changelog) = plan else {
            panic!("expected changelog plan")
        };
        assert_eq!(changelog.changes.len(), 1);
        assert_eq!(changelog.changes[0].change_type, ChangeType::Delete);
        assert_eq!(changelog.changes[0].commit_snapshot_id, 2);
    }

    #[test]
    fn test_changelog_rejects_batch_selectors() {
        let (table, source) = changelog_table();
        let err = ScanBuilder::new(table, source)
            .with_snapshot_id(1)
            .build_changelog()
            .unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));
    }

    fn exact_stats_table() -> (Arc<StrataTable>, Arc<TestSource>) {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_property(TableProperty::MetricsDefault.as_ref(), "full")
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .build()
            .unwrap();
        let files = vec![
            ManifestEntry::new(category_file("a.parquet", "A", 10, 5, 40), 1),
            ManifestEntry::new(category_file("b.parquet", "A", 7, -3, 99), 1),
        ];
        let source = TestSource::new().with_files(1, files);
        (Arc::new(table), Arc::new(source))
    }

    fn count_min_max() -> Aggregation {
        Aggregation::new(vec![
            Aggregate::CountStar,
            Aggregate::Count("id".into()),
            Aggregate::Min("id".into()),
            Aggregate::Max("id".into()),
        ])
    }

    #[test]
    fn test_aggregate_pushdown_round_trip() {
        let (table, source) = exact_stats_table();
        let plan = ScanBuilder::new(table, source)
            .with_aggregation(count_min_max())
            .build()
            .unwrap();

        let ScanPlan::Aggregate(ref aggregate) = plan else {
            panic!("expected aggregate plan")
        };
        assert_eq!(aggregate.snapshot_id, 1);
        assert_eq!(
            aggregate.row,
            vec![
                Scalar::Long(17),
                Scalar::Long(17),
                Scalar::Long(-3),
                Scalar::Long(99)
            ]
        );
        let names: Vec<&str> = plan
            .read_schema()
            .fields()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["count(*)", "count(id)", "min(id)", "max(id)"]);
        assert!(plan.tasks().is_empty());
    }

    #[test]
    fn test_aggregate_pushdown_respects_filters() {
        let (table, source) = exact_stats_table();
        // id >= 50 prunes a.parquet (bounds [5, 40]) from the statistics pass
        let plan = ScanBuilder::new(table, source)
            .with_filter(predicate(("id", ">=", "50")))
            .with_aggregation(Aggregation::new(vec![Aggregate::Max("id".into())]))
            .build()
            .unwrap();
        let ScanPlan::Aggregate(ref aggregate) = plan else {
            panic!("expected aggregate plan")
        };
        assert_eq!(aggregate.row, vec![Scalar::Long(99)]);
    }

    #[test]
    fn test_aggregate_fallback_on_group_by() {
        let (table, source) = exact_stats_table();
        let mut aggregation = count_min_max();
        aggregation.group_by.push("category".into());
        let plan = ScanBuilder::new(table, source)
            .with_aggregation(aggregation)
            .build()
            .unwrap();
        assert!(matches!(plan, ScanPlan::Batch(_)));
    }

    #[test]
    fn test_aggregate_fallback_on_metrics_modes() {
        let build_with_property = |key: String, value: &str, aggregation: Aggregation| {
            let table = StrataTable::builder("events")
                .with_schema(0, test_schema())
                .with_property(key, value)
                .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
                .build()
                .unwrap();
            let source = TestSource::new().with_files(
                1,
                vec![ManifestEntry::new(category_file("a.parquet", "A", 10, 5, 40), 1)],
            );
            ScanBuilder::new(Arc::new(table), Arc::new(source))
                .with_aggregation(aggregation)
                .build()
                .unwrap()
        };

        // statistics mode none on a referenced column rejects pushdown
        let plan = build_with_property(
            format!("{METRICS_MODE_COLUMN_CONF_PREFIX}id"),
            "none",
            Aggregation::new(vec![Aggregate::Count("id".into())]),
        );
        assert!(matches!(plan, ScanPlan::Batch(_)));

        // counts-only cannot answer min/max
        let plan = build_with_property(
            TableProperty::MetricsDefault.as_ref().to_string(),
            "counts",
            Aggregation::new(vec![Aggregate::Min("id".into())]),
        );
        assert!(matches!(plan, ScanPlan::Batch(_)));

        // truncated bounds cannot answer string min/max
        let plan = build_with_property(
            TableProperty::MetricsDefault.as_ref().to_string(),
            "truncate(16)",
            Aggregation::new(vec![Aggregate::Min("data".into())]),
        );
        assert!(matches!(plan, ScanPlan::Batch(_)));
    }

    #[test]
    fn test_aggregate_fallback_on_deletes() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_property(TableProperty::MetricsDefault.as_ref(), "full")
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Delete))
            .build()
            .unwrap();
        let entry = ManifestEntry::new(category_file("a.parquet", "A", 10, 5, 40), 1)
            .with_delete_file(crate::kernel::DeleteFile {
                path: "d.parquet".into(),
                content: DeleteContent::Position,
                record_count: 2,
                file_size_bytes: 64,
            });
        let source = TestSource::new().with_files(1, vec![entry]);

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_aggregation(count_min_max())
            .build()
            .unwrap();
        assert!(matches!(plan, ScanPlan::Batch(_)));
    }

    #[test]
    fn test_aggregate_fallback_on_listing_failure() {
        let (table, source) = exact_stats_table();
        source.fail_next_listing();
        // the pushdown pass absorbs the failure; the normal scan then
        // succeeds against the recovered source
        let plan = ScanBuilder::new(table, source)
            .with_aggregation(count_min_max())
            .build()
            .unwrap();
        assert!(matches!(plan, ScanPlan::Batch(_)));
    }

    #[test]
    fn test_listing_failure_outside_pushdown_is_fatal() {
        let (table, source) = exact_stats_table();
        source.fail_next_listing();
        let err = ScanBuilder::new(table, source).build().unwrap_err();
        assert!(matches!(err, StrataTableError::ManifestSource { .. }));
    }

    #[test]
    fn test_projection_and_metadata_columns() {
        let (table, source) = two_partition_table();
        let plan = ScanBuilder::new(table, source)
            .with_projection(vec![
                "data".to_string(),
                metadata_columns::FILE_PATH_COLUMN.to_string(),
                metadata_columns::PARTITION_COLUMN.to_string(),
            ])
            .with_filter(predicate(("id", ">", "0")))
            .build()
            .unwrap();

        let names: Vec<&str> = plan
            .read_schema()
            .fields()
            .map(|f| f.name.as_str())
            .collect();
        // filter column folded in, metadata columns appended after data
        assert_eq!(names, vec!["id", "data", "_file", "_partition"]);

        let partition = plan
            .read_schema()
            .field(metadata_columns::PARTITION_COLUMN, true)
            .unwrap();
        let DataType::Struct(inner) = &partition.data_type else {
            panic!("partition metadata column must be a struct")
        };
        // nested id reassigned away from schema ids 1-3 and spec field 1000
        assert_eq!(inner.fields().map(|f| f.id).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_snapshot_schema_is_used_for_time_travel() {
        let v0 = test_schema();
        let v1 = v0.join(&Schema::new(vec![StructField::new(
            4,
            "extra",
            DataType::STRING,
        )]));
        let table = StrataTable::builder("events")
            .with_schema(0, v0)
            .with_schema(1, v1)
            .with_snapshot(
                Snapshot::new(1, None, 100, SnapshotOperation::Append).with_schema_id(0),
            )
            .with_snapshot(
                Snapshot::new(2, Some(1), 200, SnapshotOperation::Append).with_schema_id(1),
            )
            .build()
            .unwrap();
        let source = TestSource::new();

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_snapshot_id(1)
            .build()
            .unwrap();
        assert!(plan.read_schema().field("extra", true).is_none());
    }

    #[test]
    fn test_merge_on_read_records_base_snapshot() {
        let (table, source) = two_partition_table();
        let plan = ScanBuilder::new(table.clone(), source.clone())
            .build_merge_on_read()
            .unwrap();
        let ScanPlan::MergeOnRead(ref mor) = plan else {
            panic!("expected merge-on-read plan")
        };
        assert_eq!(mor.base_snapshot_id, 2);

        let err = ScanBuilder::new(table, source)
            .with_snapshot_id(1)
            .build_merge_on_read()
            .unwrap_err();
        assert!(matches!(err, StrataTableError::InvalidScanOptions { .. }));
    }

    #[test]
    fn test_merge_on_read_carries_delete_files() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Delete))
            .build()
            .unwrap();
        let entry = ManifestEntry::new(category_file("a.parquet", "A", 10, 0, 9), 1)
            .with_delete_file(crate::kernel::DeleteFile {
                path: "d.parquet".into(),
                content: DeleteContent::Position,
                record_count: 2,
                file_size_bytes: 64,
            });
        let source = TestSource::new().with_files(1, vec![entry]);

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .build_merge_on_read()
            .unwrap();
        let deletes: usize = plan
            .tasks()
            .iter()
            .flat_map(|t| t.files.iter())
            .map(|f| f.delete_files.len())
            .sum();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn test_merge_on_read_empty_table() {
        let table = StrataTable::builder("empty")
            .with_schema(0, test_schema())
            .build()
            .unwrap();
        let plan = ScanBuilder::new(Arc::new(table), Arc::new(TestSource::new()))
            .build_merge_on_read()
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.snapshot_id(), None);
    }

    #[test]
    fn test_copy_on_write_ignores_task_residuals() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .build()
            .unwrap();
        let source = TestSource::new().with_files(
            1,
            vec![ManifestEntry::new(category_file("a.parquet", "A", 10, 0, 9), 1)],
        );

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_filter(predicate(("id", ">", "3")))
            .build_copy_on_write()
            .unwrap();
        let ScanPlan::CopyOnWrite(ref cow) = plan else {
            panic!("expected copy-on-write plan")
        };
        assert_eq!(cow.base_snapshot_id, 1);
        // whole files are rewritten: tasks carry no residual, the plan does
        assert!(plan
            .tasks()
            .iter()
            .flat_map(|t| t.files.iter())
            .all(|f| f.residual.is_empty()));
        assert_eq!(plan.residual_filters().len(), 1);
    }

    #[test]
    fn test_split_overrides_apply() {
        let table = StrataTable::builder("events")
            .with_schema(0, test_schema())
            .with_snapshot(Snapshot::new(1, None, 100, SnapshotOperation::Append))
            .build()
            .unwrap();
        // one 100KB file: records * 100 bytes
        let source = TestSource::new().with_files(
            1,
            vec![ManifestEntry::new(category_file("big.parquet", "A", 1000, 0, 999), 1)],
        );

        let plan = ScanBuilder::new(Arc::new(table), Arc::new(source))
            .with_split_size(40_000)
            .with_split_lookback(1)
            .with_split_open_file_cost(1)
            .build()
            .unwrap();
        // 100_000 bytes at a 40_000 target: three byte-range splits
        let splits: usize = plan.tasks().iter().map(|t| t.files.len()).sum();
        assert_eq!(splits, 3);
        assert!(plan.tasks().iter().all(|t| t.size_bytes() <= 40_000));
    }

    #[test]
    fn test_plans_are_shareable_across_threads() {
        let (table, source) = two_partition_table();
        let plan = ScanBuilder::new(table, source)
            .with_filter(predicate(("category", "=", "A")))
            .build()
            .unwrap();
        let shared = std::sync::Arc::new(plan);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let plan = shared.clone();
                std::thread::spawn(move || file_count(&plan))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10);
        }
    }
}
