//! Scalar values for use in expressions, partition values and file statistics.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{StrataResult, StrataTableError};
use crate::kernel::{DataType, PrimitiveType};

/// A single value, which can be null. Used for literal values in predicates,
/// partition tuples, and decoded column statistics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Scalar {
    /// true or false value
    Boolean(bool),
    /// 32bit integer
    Integer(i32),
    /// 64bit integer
    Long(i64),
    /// 32bit floating point
    Float(f32),
    /// 64bit floating point
    Double(f64),
    /// Days since UNIX epoch 1970-01-01
    Date(i32),
    /// Microsecond precision timestamp, adjusted to UTC.
    Timestamp(i64),
    /// utf-8 encoded string.
    String(String),
    /// Binary data
    Binary(Vec<u8>),
    /// Null value with a given data type.
    Null(DataType),
}

impl Scalar {
    /// Returns the data type of this scalar.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Primitive(PrimitiveType::Boolean),
            Self::Integer(_) => DataType::Primitive(PrimitiveType::Integer),
            Self::Long(_) => DataType::Primitive(PrimitiveType::Long),
            Self::Float(_) => DataType::Primitive(PrimitiveType::Float),
            Self::Double(_) => DataType::Primitive(PrimitiveType::Double),
            Self::Date(_) => DataType::Primitive(PrimitiveType::Date),
            Self::Timestamp(_) => DataType::Primitive(PrimitiveType::Timestamp),
            Self::String(_) => DataType::Primitive(PrimitiveType::String),
            Self::Binary(_) => DataType::Primitive(PrimitiveType::Binary),
            Self::Null(data_type) => data_type.clone(),
        }
    }

    /// Returns true if this scalar is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Serializes this scalar as a string.
    pub fn serialize(&self) -> String {
        match self {
            Self::String(s) => s.to_owned(),
            Self::Boolean(b) => {
                if *b {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            Self::Integer(i) => i.to_string(),
            Self::Long(l) => l.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Double(d) => d.to_string(),
            Self::Timestamp(ts) => match Utc.timestamp_micros(*ts).single() {
                Some(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                None => ts.to_string(),
            },
            Self::Date(days) => match NaiveDate::from_num_days_from_ce_opt(*days + EPOCH_DAY) {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => days.to_string(),
            },
            Self::Binary(val) => val.iter().map(|b| format!("{b:02x}")).collect(),
            Self::Null(_) => "null".to_string(),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

// Days between 0001-01-01 (chrono's CE day 1) and 1970-01-01.
const EPOCH_DAY: i32 = 719_163;

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (Null(_), Null(_)) => Some(Ordering::Equal),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (String(a), String(b)) => a.partial_cmp(b),
            (Binary(a), Binary(b)) => a.partial_cmp(b),
            // nulls sort first; only used for internal pruning purposes
            (Null(_), _) => Some(Ordering::Less),
            (_, Null(_)) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl PrimitiveType {
    /// Parse a raw string literal as a scalar of this type.
    ///
    /// Callers supply literals as engine-agnostic strings; parsing happens at
    /// bind time so that typed comparison is possible during pruning.
    pub fn parse_scalar(&self, raw: &str) -> StrataResult<Scalar> {
        let parse_err = || StrataTableError::Parse {
            value: raw.to_string(),
            data_type: DataType::Primitive(*self),
        };
        match self {
            Self::Boolean => match raw {
                "true" | "TRUE" => Ok(Scalar::Boolean(true)),
                "false" | "FALSE" => Ok(Scalar::Boolean(false)),
                _ => Err(parse_err()),
            },
            Self::Integer => raw.parse().map(Scalar::Integer).map_err(|_| parse_err()),
            Self::Long => raw.parse().map(Scalar::Long).map_err(|_| parse_err()),
            Self::Float => raw.parse().map(Scalar::Float).map_err(|_| parse_err()),
            Self::Double => raw.parse().map(Scalar::Double).map_err(|_| parse_err()),
            Self::String => Ok(Scalar::String(raw.to_string())),
            Self::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| Scalar::Date(date.num_days_from_ce() - EPOCH_DAY))
                .map_err(|_| parse_err()),
            Self::Timestamp => parse_timestamp_micros(raw)
                .map(Scalar::Timestamp)
                .ok_or_else(parse_err),
            Self::Binary => {
                if raw.len() % 2 != 0 {
                    return Err(parse_err());
                }
                (0..raw.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).map_err(|_| parse_err()))
                    .collect::<StrataResult<Vec<u8>>>()
                    .map(Scalar::Binary)
            }
        }
    }
}

/// Parse an RFC-3339 or `YYYY-mm-dd HH:MM:SS[.ffffff]` timestamp into
/// microseconds since the Unix epoch, assuming UTC when no offset is given.
fn parse_timestamp_micros(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).timestamp_micros());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_micros());
    }
    None
}
