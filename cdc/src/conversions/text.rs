use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::Type;
use uuid::Uuid;

use cdc_postgres::types::{TypeModifier, numeric_precision_scale};

use crate::conversions::bool::parse_bool;
use crate::conversions::hex::parse_bytea_hex;
use crate::conversions::numeric::PgNumeric;
use crate::types::Cell;

/// Postgres renders dates, times and timestamps in ISO format on the wire
/// when `datestyle` is ISO, which the replication connection guarantees.
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// The semantic schema type a column maps to at the destination.
///
/// This is the type vocabulary handed to the loader through catalog entries;
/// it abstracts over source type oids so the destination never needs to know
/// Postgres internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticType {
    Bool,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Fixed-point decimal; precision and scale are carried when the source
    /// column declared them via its type modifier.
    Decimal {
        precision: Option<u16>,
        scale: Option<u16>,
    },
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Bytes,
    Json,
    Uuid,
    /// Source type not in the known table; values are carried as raw text.
    Unknown,
}

/// Maps a column's wire type descriptor to its [`SemanticType`].
pub fn semantic_type(typ: &Type, modifier: TypeModifier) -> SemanticType {
    match *typ {
        Type::BOOL => SemanticType::Bool,
        Type::INT2 => SemanticType::SmallInt,
        Type::INT4 => SemanticType::Integer,
        Type::INT8 => SemanticType::BigInt,
        Type::FLOAT4 => SemanticType::Real,
        Type::FLOAT8 => SemanticType::Double,
        Type::NUMERIC => {
            let precision_scale = numeric_precision_scale(modifier);
            SemanticType::Decimal {
                precision: precision_scale.map(|(p, _)| p),
                scale: precision_scale.map(|(_, s)| s),
            }
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::CHAR => SemanticType::Text,
        Type::DATE => SemanticType::Date,
        Type::TIME => SemanticType::Time,
        Type::TIMESTAMP => SemanticType::Timestamp,
        Type::TIMESTAMPTZ => SemanticType::TimestampTz,
        Type::BYTEA => SemanticType::Bytes,
        Type::JSON | Type::JSONB => SemanticType::Json,
        Type::UUID => SemanticType::Uuid,
        _ => SemanticType::Unknown,
    }
}

/// The result of decoding one column value.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedColumn {
    /// The decoded cell value.
    pub cell: Cell,
    /// Set when the value could not be decoded as its declared type and was
    /// carried through as raw text instead.
    pub fallback: bool,
}

impl DecodedColumn {
    fn typed(cell: Cell) -> Self {
        Self {
            cell,
            fallback: false,
        }
    }

    fn raw_text(raw: &str) -> Self {
        Self {
            cell: Cell::String(raw.to_string()),
            fallback: true,
        }
    }
}

/// Decodes a single column value from its Postgres text representation.
///
/// Unrecognized type oids and values that fail to parse as their declared
/// type never fail the row: they come back as raw text with the `fallback`
/// flag set, so a single unsupported column cannot block capture of the rest
/// of the row.
pub fn decode_column(typ: &Type, modifier: TypeModifier, raw: &str) -> DecodedColumn {
    match semantic_type(typ, modifier) {
        SemanticType::Bool => match parse_bool(raw) {
            Ok(value) => DecodedColumn::typed(Cell::Bool(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::SmallInt => match raw.parse::<i16>() {
            Ok(value) => DecodedColumn::typed(Cell::I16(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Integer => match raw.parse::<i32>() {
            Ok(value) => DecodedColumn::typed(Cell::I32(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::BigInt => match raw.parse::<i64>() {
            Ok(value) => DecodedColumn::typed(Cell::I64(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Real => match raw.parse::<f32>() {
            Ok(value) => DecodedColumn::typed(Cell::F32(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Double => match raw.parse::<f64>() {
            Ok(value) => DecodedColumn::typed(Cell::F64(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Decimal { .. } => match raw.parse::<PgNumeric>() {
            Ok(value) => DecodedColumn::typed(Cell::Numeric(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Text => DecodedColumn::typed(Cell::String(raw.to_string())),
        SemanticType::Date => match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
            Ok(value) => DecodedColumn::typed(Cell::Date(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Time => match NaiveTime::parse_from_str(raw, TIME_FORMAT) {
            Ok(value) => DecodedColumn::typed(Cell::Time(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Timestamp => match NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
            Ok(value) => DecodedColumn::typed(Cell::Timestamp(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::TimestampTz => match DateTime::parse_from_str(raw, TIMESTAMPTZ_FORMAT) {
            Ok(value) => DecodedColumn::typed(Cell::TimestampTz(value.with_timezone(&Utc))),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Bytes => match parse_bytea_hex(raw) {
            Ok(value) => DecodedColumn::typed(Cell::Bytes(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Json => match serde_json::from_str(raw) {
            Ok(value) => DecodedColumn::typed(Cell::Json(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Uuid => match Uuid::parse_str(raw) {
            Ok(value) => DecodedColumn::typed(Cell::Uuid(value)),
            Err(_) => DecodedColumn::raw_text(raw),
        },
        SemanticType::Unknown => DecodedColumn::raw_text(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn decode_integers() {
        assert_eq!(
            decode_column(&Type::INT2, -1, "12").cell,
            Cell::I16(12)
        );
        assert_eq!(
            decode_column(&Type::INT4, -1, "-42").cell,
            Cell::I32(-42)
        );
        assert_eq!(
            decode_column(&Type::INT8, -1, "9007199254740993").cell,
            Cell::I64(9007199254740993)
        );
    }

    #[test]
    fn decode_floats() {
        assert_eq!(
            decode_column(&Type::FLOAT4, -1, "1.5").cell,
            Cell::F32(1.5)
        );
        assert_eq!(
            decode_column(&Type::FLOAT8, -1, "-2.25").cell,
            Cell::F64(-2.25)
        );
    }

    #[test]
    fn decode_numeric_with_precision_and_scale() {
        // numeric(10,2) typmod.
        let modifier = (10 << 16) + 2 + 4;
        let decoded = decode_column(&Type::NUMERIC, modifier, "12345.67");

        assert_eq!(
            decoded.cell,
            Cell::Numeric(PgNumeric::Value(BigDecimal::from_str("12345.67").unwrap()))
        );
        assert!(!decoded.fallback);
        assert_eq!(
            semantic_type(&Type::NUMERIC, modifier),
            SemanticType::Decimal {
                precision: Some(10),
                scale: Some(2),
            }
        );
    }

    #[test]
    fn decode_bool_and_text() {
        assert_eq!(decode_column(&Type::BOOL, -1, "t").cell, Cell::Bool(true));
        assert_eq!(
            decode_column(&Type::TEXT, -1, "hello").cell,
            Cell::String("hello".to_string())
        );
    }

    #[test]
    fn decode_temporal_values() {
        assert_eq!(
            decode_column(&Type::DATE, -1, "2024-01-31").cell,
            Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(
            decode_column(&Type::TIME, -1, "10:23:54.123456").cell,
            Cell::Time(NaiveTime::from_hms_micro_opt(10, 23, 54, 123456).unwrap())
        );
        assert_eq!(
            decode_column(&Type::TIMESTAMP, -1, "2024-01-31 10:23:54").cell,
            Cell::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 31)
                    .unwrap()
                    .and_hms_opt(10, 23, 54)
                    .unwrap()
            )
        );

        let decoded = decode_column(&Type::TIMESTAMPTZ, -1, "2024-01-31 10:23:54.123456+00");
        match decoded.cell {
            Cell::TimestampTz(value) => assert_eq!(value.timestamp(), 1_706_696_634),
            other => panic!("expected timestamptz cell, got {other:?}"),
        }
    }

    #[test]
    fn decode_bytea_json_uuid() {
        assert_eq!(
            decode_column(&Type::BYTEA, -1, "\\x48656c6c6f").cell,
            Cell::Bytes(b"Hello".to_vec())
        );
        assert_eq!(
            decode_column(&Type::JSONB, -1, r#"{"a": 1}"#).cell,
            Cell::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            decode_column(&Type::UUID, -1, "550e8400-e29b-41d4-a716-446655440000").cell,
            Cell::Uuid(Uuid::from_str("550e8400-e29b-41d4-a716-446655440000").unwrap())
        );
    }

    #[test]
    fn unknown_type_falls_back_to_text() {
        let decoded = decode_column(&Type::POINT, -1, "(1,2)");

        assert!(decoded.fallback);
        assert_eq!(decoded.cell, Cell::String("(1,2)".to_string()));
        assert_eq!(semantic_type(&Type::POINT, -1), SemanticType::Unknown);
    }

    #[test]
    fn unparsable_value_falls_back_to_text() {
        let decoded = decode_column(&Type::INT4, -1, "not-a-number");

        assert!(decoded.fallback);
        assert_eq!(decoded.cell, Cell::String("not-a-number".to_string()));
    }
}
