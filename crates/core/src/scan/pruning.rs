//! File pruning from partition values and column statistics.
//!
//! Both pruners are conservative by construction: a file is excluded only
//! when the predicate provably matches no row in it. Missing partition
//! values, missing statistics, or incomparable values always keep the file.

use std::cmp::Ordering;

use tracing::debug;

use crate::kernel::{BoundOperation, BoundPredicate, DataFile, PartitionSpec, Scalar, Transform};
use crate::table::StrataTable;

/// How a bound predicate relates to a file's partition tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMatch {
    /// Every row in the file satisfies the predicate.
    SelectsAll,
    /// No row in the file can satisfy the predicate.
    SelectsNone,
    /// The partition tuple cannot decide the predicate.
    Inconclusive,
}

/// Whether a predicate can be answered completely from partition values, for
/// every partition spec in the table's history.
///
/// A table with no partitioned spec at all can never answer a predicate on
/// the storage side, even when the predicate would otherwise fully select;
/// such predicates stay post-scan residuals. Only identity-transformed
/// partition columns give exact row-level answers, so any spec that buckets,
/// truncates, or otherwise derives the column forces a residual as well.
pub fn selects_partitions(predicate: &BoundPredicate, table: &StrataTable) -> bool {
    if table.is_unpartitioned() {
        return false;
    }
    table.specs().all(|spec| {
        spec.field_for_source(predicate.field.id)
            .map(|field| field.transform.is_identity())
            .unwrap_or(false)
    })
}

/// Classify a conjunction of bound predicates against one file's partition
/// tuple under the spec the file was written with.
pub fn evaluate_partition(
    predicates: &[BoundPredicate],
    spec: &PartitionSpec,
    file: &DataFile,
) -> PartitionMatch {
    let mut all_exact = true;
    for predicate in predicates {
        match evaluate_one(predicate, spec, file) {
            PartitionMatch::SelectsNone => return PartitionMatch::SelectsNone,
            PartitionMatch::SelectsAll => {}
            PartitionMatch::Inconclusive => all_exact = false,
        }
    }
    if all_exact {
        PartitionMatch::SelectsAll
    } else {
        PartitionMatch::Inconclusive
    }
}

fn evaluate_one(
    predicate: &BoundPredicate,
    spec: &PartitionSpec,
    file: &DataFile,
) -> PartitionMatch {
    let Some(partition_field) = spec.field_for_source(predicate.field.id) else {
        return PartitionMatch::Inconclusive;
    };
    let Some(value) = file.partition.get(&partition_field.name) else {
        return PartitionMatch::Inconclusive;
    };

    // null checks are exact under every transform: all transforms map null
    // to null and non-null to non-null
    match &predicate.op {
        BoundOperation::IsNull => {
            return if value.is_null() {
                PartitionMatch::SelectsAll
            } else {
                PartitionMatch::SelectsNone
            }
        }
        BoundOperation::IsNotNull => {
            return if value.is_null() {
                PartitionMatch::SelectsNone
            } else {
                PartitionMatch::SelectsAll
            }
        }
        _ => {}
    }

    match partition_field.transform {
        Transform::Identity => evaluate_identity(&predicate.op, value),
        transform if transform.preserves_order() => {
            evaluate_transformed(&predicate.op, transform, value)
        }
        _ => PartitionMatch::Inconclusive,
    }
}

/// Exact evaluation: under the identity transform the partition value *is*
/// the column value of every row in the file.
fn evaluate_identity(op: &BoundOperation, value: &Scalar) -> PartitionMatch {
    let exact = |matched: Option<bool>| match matched {
        Some(true) => PartitionMatch::SelectsAll,
        Some(false) => PartitionMatch::SelectsNone,
        None => PartitionMatch::Inconclusive,
    };
    let compare = |literal: &Scalar| value.partial_cmp(literal);
    match op {
        BoundOperation::Equal(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord == Ordering::Equal))
        }
        BoundOperation::NotEqual(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord != Ordering::Equal))
        }
        BoundOperation::GreaterThan(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord == Ordering::Greater))
        }
        BoundOperation::GreaterThanOrEqual(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord != Ordering::Less))
        }
        BoundOperation::LessThan(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord == Ordering::Less))
        }
        BoundOperation::LessThanOrEqual(lit) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(compare(lit).map(|ord| ord != Ordering::Greater))
        }
        BoundOperation::In(lits) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(Some(lits.iter().any(|lit| {
                value.partial_cmp(lit) == Some(Ordering::Equal)
            })))
        }
        BoundOperation::NotIn(lits) => {
            if value.is_null() {
                return PartitionMatch::SelectsNone;
            }
            exact(Some(!lits.iter().any(|lit| {
                value.partial_cmp(lit) == Some(Ordering::Equal)
            })))
        }
        BoundOperation::IsNull | BoundOperation::IsNotNull => PartitionMatch::Inconclusive,
    }
}

/// Inclusive evaluation for order-preserving transforms: the partition value
/// is the transform of every row's column value, so a mismatch can rule the
/// file out, but a match never fully selects it.
fn evaluate_transformed(
    op: &BoundOperation,
    transform: Transform,
    value: &Scalar,
) -> PartitionMatch {
    if value.is_null() {
        // non-null comparisons never match a file of all-null source values
        return PartitionMatch::SelectsNone;
    }
    let might_match = |kept: Option<bool>| match kept {
        Some(false) => PartitionMatch::SelectsNone,
        _ => PartitionMatch::Inconclusive,
    };
    let projected = |lit: &Scalar| transform.apply(lit);
    match op {
        BoundOperation::Equal(lit) => might_match(
            projected(lit).and_then(|p| value.partial_cmp(&p).map(|ord| ord == Ordering::Equal)),
        ),
        BoundOperation::LessThan(lit) | BoundOperation::LessThanOrEqual(lit) => might_match(
            projected(lit).and_then(|p| value.partial_cmp(&p).map(|ord| ord != Ordering::Greater)),
        ),
        BoundOperation::GreaterThan(lit) | BoundOperation::GreaterThanOrEqual(lit) => might_match(
            projected(lit).and_then(|p| value.partial_cmp(&p).map(|ord| ord != Ordering::Less)),
        ),
        BoundOperation::In(lits) => {
            let mut any_unknown = false;
            let any_match = lits.iter().any(|lit| match projected(lit) {
                Some(p) => value.partial_cmp(&p) == Some(Ordering::Equal),
                None => {
                    any_unknown = true;
                    false
                }
            });
            might_match(Some(any_match || any_unknown))
        }
        _ => PartitionMatch::Inconclusive,
    }
}

/// Whether a file might contain rows matching every predicate, judged from
/// its column statistics. `false` is a proof of absence; `true` is not a
/// proof of presence.
pub fn might_match_file(predicates: &[BoundPredicate], file: &DataFile) -> bool {
    for predicate in predicates {
        if !might_match_one(predicate, file) {
            debug!(
                path = file.path.as_str(),
                "file pruned by column statistics"
            );
            return false;
        }
    }
    true
}

fn might_match_one(predicate: &BoundPredicate, file: &DataFile) -> bool {
    let id = predicate.field.id;
    let lower = file.lower_bounds.get(&id);
    let upper = file.upper_bounds.get(&id);
    let nulls = file.null_value_counts.get(&id).copied();
    let values = file.value_counts.get(&id).copied();

    // every non-null comparison fails on a column with no non-null values
    let all_null = matches!((nulls, values), (Some(n), Some(v)) if n == v && v > 0);

    let lt = |a: &Scalar, b: &Scalar| a.partial_cmp(b) == Some(Ordering::Less);
    let gt = |a: &Scalar, b: &Scalar| a.partial_cmp(b) == Some(Ordering::Greater);
    let le = |a: &Scalar, b: &Scalar| matches!(a.partial_cmp(b), Some(Ordering::Less | Ordering::Equal));
    let eq = |a: &Scalar, b: &Scalar| a.partial_cmp(b) == Some(Ordering::Equal);

    match &predicate.op {
        BoundOperation::Equal(lit) => {
            if all_null {
                return false;
            }
            if let Some(lower) = lower {
                if gt(lower, lit) {
                    return false;
                }
            }
            if let Some(upper) = upper {
                if lt(upper, lit) {
                    return false;
                }
            }
            true
        }
        BoundOperation::NotEqual(lit) => {
            // only a file where every non-null value equals the literal is out
            match (lower, upper) {
                (Some(lower), Some(upper)) => !(eq(lower, lit) && eq(upper, lit)),
                _ => true,
            }
        }
        BoundOperation::GreaterThan(lit) => {
            if all_null {
                return false;
            }
            match upper {
                Some(upper) => gt(upper, lit),
                None => true,
            }
        }
        BoundOperation::GreaterThanOrEqual(lit) => {
            if all_null {
                return false;
            }
            match upper {
                Some(upper) => !lt(upper, lit),
                None => true,
            }
        }
        BoundOperation::LessThan(lit) => {
            if all_null {
                return false;
            }
            match lower {
                Some(lower) => lt(lower, lit),
                None => true,
            }
        }
        BoundOperation::LessThanOrEqual(lit) => {
            if all_null {
                return false;
            }
            match lower {
                Some(lower) => le(lower, lit),
                None => true,
            }
        }
        BoundOperation::In(lits) => {
            if all_null {
                return false;
            }
            match (lower, upper) {
                (Some(lower), Some(upper)) => lits
                    .iter()
                    .any(|lit| !gt(lower, lit) && !lt(upper, lit)),
                _ => true,
            }
        }
        BoundOperation::NotIn(lits) => match (lower, upper) {
            (Some(lower), Some(upper)) => {
                !(eq(lower, upper) && lits.iter().any(|lit| eq(lower, lit)))
            }
            _ => true,
        },
        BoundOperation::IsNull => nulls != Some(0),
        BoundOperation::IsNotNull => !all_null,
    }
}
