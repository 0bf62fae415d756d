//! Stratalake table configuration

use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::StrataTableError;

/// Typed property keys that can be defined on a stratalake table
#[derive(PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TableProperty {
    /// Target size, in bytes, of a single scan task produced by split planning.
    SplitSize,

    /// Number of in-flight candidate task groupings considered when packing
    /// small files into scan tasks.
    SplitLookback,

    /// Minimum weight, in bytes, a file contributes to a scan task; biases
    /// split planning against tasks made of many tiny files.
    SplitOpenFileCost,

    /// true to allow answering aggregations from file statistics without
    /// reading data.
    AggregatePushdownEnabled,

    /// true when the hosting engine should distribute planning work; recorded
    /// on plans, local planning is always the fallback.
    DistributedPlanningEnabled,

    /// Default column-statistics collection mode, e.g. `none`, `counts`,
    /// `truncate(16)` or `full`. Overridable per column with
    /// `write.metadata.metrics.column.<name>`.
    MetricsDefault,
}

impl AsRef<str> for TableProperty {
    fn as_ref(&self) -> &str {
        match self {
            Self::SplitSize => "read.split.target-size",
            Self::SplitLookback => "read.split.planning-lookback",
            Self::SplitOpenFileCost => "read.split.open-file-cost",
            Self::AggregatePushdownEnabled => "read.aggregate-pushdown.enabled",
            Self::DistributedPlanningEnabled => "read.distributed-planning.enabled",
            Self::MetricsDefault => "write.metadata.metrics.default",
        }
    }
}

impl FromStr for TableProperty {
    type Err = StrataTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read.split.target-size" => Ok(Self::SplitSize),
            "read.split.planning-lookback" => Ok(Self::SplitLookback),
            "read.split.open-file-cost" => Ok(Self::SplitOpenFileCost),
            "read.aggregate-pushdown.enabled" => Ok(Self::AggregatePushdownEnabled),
            "read.distributed-planning.enabled" => Ok(Self::DistributedPlanningEnabled),
            "write.metadata.metrics.default" => Ok(Self::MetricsDefault),
            _ => Err(StrataTableError::Generic("unknown config key".into())),
        }
    }
}

/// Property prefix for per-column statistics modes.
pub const METRICS_MODE_COLUMN_CONF_PREFIX: &str = "write.metadata.metrics.column.";

/// Default target scan task size: 128MB.
pub const DEFAULT_SPLIT_SIZE: i64 = 128 * 1024 * 1024;
/// Default packing lookback window.
pub const DEFAULT_SPLIT_LOOKBACK: usize = 10;
/// Default open file cost: 4MB.
pub const DEFAULT_SPLIT_OPEN_FILE_COST: i64 = 4 * 1024 * 1024;

/// How much statistics information is collected for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsMode {
    /// No statistics at all.
    None,
    /// Value and null counts only; no bounds.
    Counts,
    /// Counts plus bounds truncated to the given length; string bounds are
    /// not exact.
    Truncate(u32),
    /// Counts plus exact bounds.
    Full,
}

impl FromStr for MetricsMode {
    type Err = StrataTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "none" => Ok(Self::None),
            "counts" => Ok(Self::Counts),
            "full" => Ok(Self::Full),
            other => {
                let length = other
                    .strip_prefix("truncate(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|len| len.parse::<u32>().ok())
                    .filter(|len| *len > 0);
                match length {
                    Some(len) => Ok(Self::Truncate(len)),
                    None => Err(StrataTableError::Generic(format!(
                        "unsupported metrics mode '{s}'"
                    ))),
                }
            }
        }
    }
}

/// Well known configuration values for a stratalake table, backed by the raw
/// string property map.
pub struct TableConfig<'a>(pub(crate) &'a HashMap<String, String>);

impl TableConfig<'_> {
    fn get(&self, property: TableProperty) -> Option<&String> {
        self.0.get(property.as_ref())
    }

    /// Target size of a single scan task, in bytes.
    pub fn split_size(&self) -> i64 {
        self.get(TableProperty::SplitSize)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SPLIT_SIZE)
    }

    /// Number of candidate groupings kept open while packing scan tasks.
    pub fn split_lookback(&self) -> usize {
        self.get(TableProperty::SplitLookback)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SPLIT_LOOKBACK)
    }

    /// Minimum weight a file contributes to a scan task, in bytes.
    pub fn split_open_file_cost(&self) -> i64 {
        self.get(TableProperty::SplitOpenFileCost)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SPLIT_OPEN_FILE_COST)
    }

    /// Whether aggregate pushdown is allowed for this table.
    pub fn aggregate_pushdown_enabled(&self) -> bool {
        self.get(TableProperty::AggregatePushdownEnabled)
            .map(|v| v.to_ascii_lowercase() == "true")
            .unwrap_or(true)
    }

    /// Whether the hosting engine asked for distributed planning.
    pub fn distributed_planning_enabled(&self) -> bool {
        self.get(TableProperty::DistributedPlanningEnabled)
            .map(|v| v.to_ascii_lowercase() == "true")
            .unwrap_or(false)
    }

    /// The statistics collection mode for the given column.
    pub fn column_metrics_mode(&self, column: &str) -> MetricsMode {
        let column_key = format!("{METRICS_MODE_COLUMN_CONF_PREFIX}{column}");
        self.0
            .get(&column_key)
            .or_else(|| self.get(TableProperty::MetricsDefault))
            .and_then(|v| v.parse().ok())
            .unwrap_or(MetricsMode::Truncate(16))
    }
}
