use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;

/// A single decoded column value.
///
/// [`Cell`] is the typed representation of one column in a replicated row.
/// [`Cell::Null`] is an explicit SQL null sent by the stream, which is
/// distinct from a column being absent from a tuple altogether (as happens
/// for unchanged TOAST values and omitted before-images).
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Explicit null value from the wire.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer (`int2`).
    I16(i16),
    /// 32-bit signed integer (`int4`).
    I32(i32),
    /// 64-bit signed integer (`int8`).
    I64(i64),
    /// 32-bit floating point (`float4`).
    F32(f32),
    /// 64-bit floating point (`float8`).
    F64(f64),
    /// Arbitrary precision numeric value.
    Numeric(PgNumeric),
    /// Text value (`text`, `varchar`, `bpchar`, and the fallback for
    /// unrecognized types).
    String(String),
    /// Calendar date without time zone.
    Date(NaiveDate),
    /// Time of day without time zone.
    Time(NaiveTime),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
    /// Timestamp with time zone, normalized to UTC.
    TimestampTz(DateTime<Utc>),
    /// UUID value.
    Uuid(Uuid),
    /// JSON or JSONB document.
    Json(serde_json::Value),
    /// Raw byte array (`bytea`).
    Bytes(Vec<u8>),
}

impl Cell {
    /// Returns `true` if the cell is an explicit null.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I16(value) => write!(f, "{value}"),
            Cell::I32(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::F32(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::Numeric(value) => write!(f, "{value}"),
            Cell::String(value) => write!(f, "{value}"),
            Cell::Date(value) => write!(f, "{value}"),
            Cell::Time(value) => write!(f, "{value}"),
            Cell::Timestamp(value) => write!(f, "{value}"),
            Cell::TimestampTz(value) => write!(f, "{value}"),
            Cell::Uuid(value) => write!(f, "{value}"),
            Cell::Json(value) => write!(f, "{value}"),
            Cell::Bytes(value) => write!(f, "{value:?}"),
        }
    }
}
