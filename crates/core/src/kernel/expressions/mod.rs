//! Filter and aggregate expressions, and their binding against a schema.
//!
//! Callers hand the planner *unbound* predicates: a column name plus an
//! operation over raw string literals. Binding resolves the column against a
//! concrete schema version and parses the literals as the column's type.
//! Binding failures are recoverable by design; the planner demotes the
//! predicate to a post-scan residual filter instead of aborting the plan.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{DataType, Schema, StructField};

pub mod scalars;

pub use scalars::Scalar;

/// The operation applied by a filter predicate, together with its raw,
/// still-untyped literal operand(s).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PredicateValue {
    /// The value with the equal operator
    Equal(String),
    /// The value with the not equal operator
    NotEqual(String),
    /// The value with the greater than operator
    GreaterThan(String),
    /// The value with the greater than or equal operator
    GreaterThanOrEqual(String),
    /// The value with the less than operator
    LessThan(String),
    /// The value with the less than or equal operator
    LessThanOrEqual(String),
    /// The values with the in operator
    In(Vec<String>),
    /// The values with the not in operator
    NotIn(Vec<String>),
    /// The column is null
    IsNull,
    /// The column is not null
    IsNotNull,
}

/// A filter predicate over a single column, not yet resolved against a schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// The referenced column name.
    pub column: String,
    /// The operation and literal operand(s).
    pub value: PredicateValue,
}

impl Predicate {
    /// Bind this predicate against a schema, resolving the column reference
    /// and parsing every literal as the column's type.
    pub fn bind(&self, schema: &Schema, case_sensitive: bool) -> StrataResult<BoundPredicate> {
        let field = schema
            .field(&self.column, case_sensitive)
            .ok_or_else(|| StrataTableError::UnknownField(self.column.clone()))?;
        let primitive = field.data_type.as_primitive().ok_or_else(|| {
            StrataTableError::InvalidPredicate(format!(
                "cannot filter on non-primitive column '{}'",
                field.name
            ))
        })?;
        let parse = |raw: &String| primitive.parse_scalar(raw);
        let parse_all = |raw: &Vec<String>| raw.iter().map(parse).collect::<StrataResult<Vec<_>>>();
        let op = match &self.value {
            PredicateValue::Equal(raw) => BoundOperation::Equal(parse(raw)?),
            PredicateValue::NotEqual(raw) => BoundOperation::NotEqual(parse(raw)?),
            PredicateValue::GreaterThan(raw) => BoundOperation::GreaterThan(parse(raw)?),
            PredicateValue::GreaterThanOrEqual(raw) => {
                BoundOperation::GreaterThanOrEqual(parse(raw)?)
            }
            PredicateValue::LessThan(raw) => BoundOperation::LessThan(parse(raw)?),
            PredicateValue::LessThanOrEqual(raw) => BoundOperation::LessThanOrEqual(parse(raw)?),
            PredicateValue::In(raw) => BoundOperation::In(parse_all(raw)?),
            PredicateValue::NotIn(raw) => BoundOperation::NotIn(parse_all(raw)?),
            PredicateValue::IsNull => BoundOperation::IsNull,
            PredicateValue::IsNotNull => BoundOperation::IsNotNull,
        };
        Ok(BoundPredicate {
            field: field.clone(),
            op,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted = |values: &[String]| {
            values
                .iter()
                .map(|v| format!("'{v}'"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &self.value {
            PredicateValue::Equal(value) => write!(f, "{} = '{}'", self.column, value),
            PredicateValue::NotEqual(value) => write!(f, "{} != '{}'", self.column, value),
            PredicateValue::GreaterThan(value) => write!(f, "{} > '{}'", self.column, value),
            PredicateValue::GreaterThanOrEqual(value) => {
                write!(f, "{} >= '{}'", self.column, value)
            }
            PredicateValue::LessThan(value) => write!(f, "{} < '{}'", self.column, value),
            PredicateValue::LessThanOrEqual(value) => write!(f, "{} <= '{}'", self.column, value),
            PredicateValue::In(values) => write!(f, "{} IN ({})", self.column, quoted(values)),
            PredicateValue::NotIn(values) => {
                write!(f, "{} NOT IN ({})", self.column, quoted(values))
            }
            PredicateValue::IsNull => write!(f, "{} IS NULL", self.column),
            PredicateValue::IsNotNull => write!(f, "{} IS NOT NULL", self.column),
        }
    }
}

/// Create a Predicate from a filter tuple with the structure (column, operation, value).
impl TryFrom<(&str, &str, &str)> for Predicate {
    type Error = StrataTableError;

    fn try_from(filter: (&str, &str, &str)) -> Result<Self, StrataTableError> {
        let (column, op, value) = filter;
        if column.is_empty() {
            return Err(StrataTableError::InvalidPredicate(format!("{filter:?}")));
        }
        let value = match op {
            "=" => PredicateValue::Equal(value.to_owned()),
            "!=" => PredicateValue::NotEqual(value.to_owned()),
            ">" => PredicateValue::GreaterThan(value.to_owned()),
            ">=" => PredicateValue::GreaterThanOrEqual(value.to_owned()),
            "<" => PredicateValue::LessThan(value.to_owned()),
            "<=" => PredicateValue::LessThanOrEqual(value.to_owned()),
            _ => return Err(StrataTableError::InvalidPredicate(format!("{filter:?}"))),
        };
        Ok(Predicate {
            column: column.to_owned(),
            value,
        })
    }
}

/// Create a Predicate from a filter tuple with the structure (column, operation, list(value)).
impl TryFrom<(&str, &str, &[&str])> for Predicate {
    type Error = StrataTableError;

    fn try_from(filter: (&str, &str, &[&str])) -> Result<Self, StrataTableError> {
        let (column, op, values) = filter;
        if column.is_empty() {
            return Err(StrataTableError::InvalidPredicate(format!("{filter:?}")));
        }
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let value = match op {
            "in" => PredicateValue::In(values),
            "not in" => PredicateValue::NotIn(values),
            _ => return Err(StrataTableError::InvalidPredicate(format!("{filter:?}"))),
        };
        Ok(Predicate {
            column: column.to_owned(),
            value,
        })
    }
}

/// A predicate operation with literals parsed as the bound column's type.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundOperation {
    /// column = literal
    Equal(Scalar),
    /// column != literal
    NotEqual(Scalar),
    /// column > literal
    GreaterThan(Scalar),
    /// column >= literal
    GreaterThanOrEqual(Scalar),
    /// column < literal
    LessThan(Scalar),
    /// column <= literal
    LessThanOrEqual(Scalar),
    /// column ∈ literals
    In(Vec<Scalar>),
    /// column ∉ literals
    NotIn(Vec<Scalar>),
    /// column is null
    IsNull,
    /// column is not null
    IsNotNull,
}

/// A filter predicate resolved against a specific schema version.
///
/// Carries the full referenced field so it can be evaluated against partition
/// values or file statistics without further schema lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPredicate {
    /// The resolved schema field this predicate references.
    pub field: StructField,
    /// The typed operation.
    pub op: BoundOperation,
}

/// An aggregate function over a column, not yet resolved against a schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Aggregate {
    /// `COUNT(*)`
    CountStar,
    /// `COUNT(column)`, counting non-null values
    Count(String),
    /// `MIN(column)`
    Min(String),
    /// `MAX(column)`
    Max(String),
}

impl Aggregate {
    /// The referenced column name, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Aggregate::CountStar => None,
            Aggregate::Count(col) | Aggregate::Min(col) | Aggregate::Max(col) => Some(col),
        }
    }

    /// Bind this aggregate against a schema.
    pub fn bind(&self, schema: &Schema, case_sensitive: bool) -> StrataResult<BoundAggregate> {
        let field = match self.column() {
            None => None,
            Some(column) => Some(
                schema
                    .field(column, case_sensitive)
                    .ok_or_else(|| StrataTableError::UnknownField(column.to_string()))?
                    .clone(),
            ),
        };
        let op = match self {
            Aggregate::CountStar => AggregateOp::CountStar,
            Aggregate::Count(_) => AggregateOp::Count,
            Aggregate::Min(_) => AggregateOp::Min,
            Aggregate::Max(_) => AggregateOp::Max,
        };
        Ok(BoundAggregate { op, field })
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::CountStar => write!(f, "count(*)"),
            Aggregate::Count(col) => write!(f, "count({col})"),
            Aggregate::Min(col) => write!(f, "min({col})"),
            Aggregate::Max(col) => write!(f, "max({col})"),
        }
    }
}

/// The function applied by a bound aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// `COUNT(*)`
    CountStar,
    /// `COUNT(column)`
    Count,
    /// `MIN(column)`
    Min,
    /// `MAX(column)`
    Max,
}

/// An aggregate function resolved against a specific schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundAggregate {
    /// The aggregate function.
    pub op: AggregateOp,
    /// The resolved field, `None` for `COUNT(*)`.
    pub field: Option<StructField>,
}

impl BoundAggregate {
    /// The type of the value this aggregate produces.
    pub fn result_type(&self) -> DataType {
        match self.op {
            AggregateOp::CountStar | AggregateOp::Count => DataType::LONG,
            AggregateOp::Min | AggregateOp::Max => self
                .field
                .as_ref()
                .map(|f| f.data_type.clone())
                .unwrap_or(DataType::LONG),
        }
    }
}

/// A complete aggregation request: aggregate functions plus grouping columns.
///
/// Grouped aggregate pushdown is unsupported; a non-empty `group_by` makes
/// the planner fall back to a normal scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregation {
    /// The requested aggregate functions, in output order.
    pub aggregates: Vec<Aggregate>,
    /// Grouping columns, empty for a global aggregate.
    pub group_by: Vec<String>,
}

impl Aggregation {
    /// A global aggregation over the given functions.
    pub fn new(aggregates: Vec<Aggregate>) -> Self {
        Self {
            aggregates,
            group_by: Vec::new(),
        }
    }
}
