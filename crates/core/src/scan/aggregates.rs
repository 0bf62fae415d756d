//! Answering aggregations from file statistics alone.
//!
//! The evaluator accumulates `COUNT`/`MIN`/`MAX` results from per-file
//! column statistics during a manifest listing pass. Feasibility is checked
//! up front against the table's statistics collection modes; validity is
//! tracked per accumulator while files stream by, because a single file with
//! a missing bound makes a `MIN`/`MAX` unanswerable.

use tracing::info;

use crate::kernel::{AggregateOp, BoundAggregate, DataFile, Scalar, Schema, StructField};
use crate::table::config::{MetricsMode, TableConfig};

/// Whether the table's statistics collection modes can answer every
/// requested aggregate.
pub(crate) fn metrics_modes_support(
    aggregates: &[BoundAggregate],
    config: &TableConfig<'_>,
) -> bool {
    for aggregate in aggregates {
        let Some(field) = &aggregate.field else {
            continue; // count(*) reads only record counts
        };
        let is_min_max = matches!(aggregate.op, AggregateOp::Min | AggregateOp::Max);
        match config.column_metrics_mode(&field.name) {
            MetricsMode::None => {
                info!(column = field.name.as_str(), "skipping aggregate pushdown: no metrics for column");
                return false;
            }
            MetricsMode::Counts if is_min_max => {
                info!(
                    column = field.name.as_str(),
                    "skipping aggregate pushdown: cannot produce min or max from counts"
                );
                return false;
            }
            MetricsMode::Truncate(_) if is_min_max && field.data_type.is_string() => {
                info!(
                    column = field.name.as_str(),
                    "skipping aggregate pushdown: cannot produce min or max from truncated values"
                );
                return false;
            }
            _ => {}
        }
    }
    true
}

/// Accumulates aggregate results from per-file statistics.
pub(crate) struct AggregateEvaluator {
    aggregates: Vec<BoundAggregate>,
    accumulators: Vec<Accumulator>,
}

enum Accumulator {
    CountStar { count: i64 },
    Count { count: i64, valid: bool },
    Min { value: Option<Scalar>, valid: bool },
    Max { value: Option<Scalar>, valid: bool },
}

impl AggregateEvaluator {
    pub(crate) fn new(aggregates: Vec<BoundAggregate>) -> Self {
        let accumulators = aggregates
            .iter()
            .map(|aggregate| match aggregate.op {
                AggregateOp::CountStar => Accumulator::CountStar { count: 0 },
                AggregateOp::Count => Accumulator::Count {
                    count: 0,
                    valid: true,
                },
                AggregateOp::Min => Accumulator::Min {
                    value: None,
                    valid: true,
                },
                AggregateOp::Max => Accumulator::Max {
                    value: None,
                    valid: true,
                },
            })
            .collect();
        Self {
            aggregates,
            accumulators,
        }
    }

    /// Fold one file's statistics into every accumulator.
    pub(crate) fn update(&mut self, file: &DataFile) {
        for (aggregate, accumulator) in self.aggregates.iter().zip(&mut self.accumulators) {
            let field_id = aggregate.field.as_ref().map(|f| f.id);
            match accumulator {
                Accumulator::CountStar { count } => *count += file.record_count,
                Accumulator::Count { count, valid } => match field_id.and_then(|id| {
                    file.value_counts
                        .get(&id)
                        .zip(file.null_value_counts.get(&id))
                }) {
                    Some((values, nulls)) => *count += values - nulls,
                    None => *valid = false,
                },
                Accumulator::Min { value, valid } => {
                    let bound = field_id.and_then(|id| file.lower_bounds.get(&id));
                    merge_bound(value, valid, bound, true);
                }
                Accumulator::Max { value, valid } => {
                    let bound = field_id.and_then(|id| file.upper_bounds.get(&id));
                    merge_bound(value, valid, bound, false);
                }
            }
        }
    }

    /// True when every accumulator still has a defined answer.
    pub(crate) fn all_valid(&self) -> bool {
        self.accumulators.iter().all(|acc| match acc {
            Accumulator::CountStar { .. } => true,
            Accumulator::Count { valid, .. }
            | Accumulator::Min { valid, .. }
            | Accumulator::Max { valid, .. } => *valid,
        })
    }

    /// The single result row and its schema, one field per aggregate.
    pub(crate) fn result(self) -> (Schema, Vec<Scalar>) {
        let mut fields = Vec::with_capacity(self.aggregates.len());
        let mut row = Vec::with_capacity(self.aggregates.len());
        for (idx, (aggregate, accumulator)) in self
            .aggregates
            .iter()
            .zip(self.accumulators)
            .enumerate()
        {
            let result_type = aggregate.result_type();
            let value = match accumulator {
                Accumulator::CountStar { count } | Accumulator::Count { count, .. } => {
                    Scalar::Long(count)
                }
                Accumulator::Min { value, .. } | Accumulator::Max { value, .. } => {
                    value.unwrap_or(Scalar::Null(result_type.clone()))
                }
            };
            fields.push(StructField::new(
                idx as i32 + 1,
                result_name(aggregate),
                result_type,
            ));
            row.push(value);
        }
        (Schema::new(fields), row)
    }
}

fn result_name(aggregate: &BoundAggregate) -> String {
    let column = aggregate
        .field
        .as_ref()
        .map(|f| f.name.as_str())
        .unwrap_or("*");
    match aggregate.op {
        AggregateOp::CountStar | AggregateOp::Count => format!("count({column})"),
        AggregateOp::Min => format!("min({column})"),
        AggregateOp::Max => format!("max({column})"),
    }
}

/// Merge one file's bound into a running min/max; a file without the bound,
/// or with a bound that does not compare, invalidates the aggregate.
fn merge_bound(
    current: &mut Option<Scalar>,
    valid: &mut bool,
    bound: Option<&Scalar>,
    take_min: bool,
) {
    let Some(bound) = bound else {
        *valid = false;
        return;
    };
    match current.take() {
        None => *current = Some(bound.clone()),
        Some(existing) => match existing.partial_cmp(bound) {
            None => {
                *current = Some(existing);
                *valid = false;
            }
            Some(ordering) => {
                let keep_existing = if take_min {
                    ordering.is_le()
                } else {
                    ordering.is_ge()
                };
                *current = Some(if keep_existing {
                    existing
                } else {
                    bound.clone()
                });
            }
        },
    }
}
