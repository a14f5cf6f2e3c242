use core::str;
use postgres_replication::protocol;
use tokio_postgres::types::PgLsn;
use tracing::warn;

use cdc_postgres::types::{ColumnSchema, TableId, TableName, TableSchema, convert_type_oid_to_type};

use crate::bail;
use crate::conversions::text::decode_column;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{BeginEvent, Cell, CommitEvent, TableRow};

/// Creates a [`BeginEvent`] from Postgres protocol data.
///
/// This method parses the replication protocol begin message and extracts
/// transaction metadata for use in the capture stream.
pub fn parse_event_from_begin_message(
    start_lsn: PgLsn,
    begin_body: &protocol::BeginBody,
) -> BeginEvent {
    BeginEvent {
        start_lsn,
        commit_lsn: PgLsn::from(begin_body.final_lsn()),
        timestamp: begin_body.timestamp(),
        xid: begin_body.xid(),
    }
}

/// Creates a [`CommitEvent`] from Postgres protocol data.
///
/// This method parses the replication protocol commit message and extracts
/// transaction completion metadata for use in the capture stream.
pub fn parse_event_from_commit_message(
    start_lsn: PgLsn,
    commit_body: &protocol::CommitBody,
) -> CommitEvent {
    CommitEvent {
        start_lsn,
        commit_lsn: PgLsn::from(commit_body.commit_lsn()),
        flags: commit_body.flags(),
        end_lsn: commit_body.end_lsn(),
        timestamp: commit_body.timestamp(),
    }
}

/// Builds a [`TableSchema`] from a replication protocol relation message.
///
/// The relation message carries the table's qualified name and, per column,
/// the name, type oid, type modifier and replica identity membership flag.
pub fn build_table_schema_from_relation_message(
    relation_body: &protocol::RelationBody,
) -> CdcResult<TableSchema> {
    let table_id = TableId::new(relation_body.rel_id());
    let table_name = TableName::new(
        relation_body.namespace()?.to_string(),
        relation_body.name()?.to_string(),
    );

    let mut table_schema = TableSchema::new(
        table_id,
        table_name,
        Vec::with_capacity(relation_body.columns().len()),
    );
    for column in relation_body.columns() {
        table_schema.add_column_schema(build_column_schema(column)?);
    }

    Ok(table_schema)
}

/// Constructs a [`ColumnSchema`] from Postgres protocol column data.
fn build_column_schema(column: &protocol::Column) -> CdcResult<ColumnSchema> {
    Ok(ColumnSchema::new(
        column.name()?.to_string(),
        convert_type_oid_to_type(column.type_id() as u32),
        column.type_modifier(),
        // Currently 1 means that the column is part of the replica identity.
        column.flags() == 1,
    ))
}

/// Converts Postgres tuple data into a [`TableRow`] using column schemas.
///
/// This function transforms raw tuple data from the replication protocol into
/// a structured row representation. Explicit null markers become
/// [`Cell::Null`]; unchanged TOAST values are taken from the old row when one
/// is available. A column whose value cannot be decoded as its declared type
/// is carried through as raw text and logged, never failing the row.
pub fn convert_tuple_to_row(
    column_schemas: &[ColumnSchema],
    tuple_data: &[protocol::TupleData],
    old_table_row: &mut Option<TableRow>,
) -> CdcResult<TableRow> {
    let mut values = Vec::with_capacity(column_schemas.len());

    for (i, column_schema) in column_schemas.iter().enumerate() {
        // We are expecting that for each column, there is corresponding tuple
        // data, even for null values.
        let Some(tuple_data) = &tuple_data.get(i) else {
            bail!(
                ErrorKind::ConversionError,
                "Tuple data does not contain data at the specified index",
                format!(
                    "No tuple data at index {} for column {}",
                    i, column_schema.name
                )
            );
        };

        let cell = match tuple_data {
            protocol::TupleData::Null => Cell::Null,
            protocol::TupleData::UnchangedToast => {
                // For unchanged toast values we take the value out of the old
                // row and move a null value in its place to avoid a clone,
                // because toast values tend to be large. Without an old row
                // the value is simply not available on the wire.
                match old_table_row {
                    Some(row) => std::mem::replace(&mut row.values[i], Cell::Null),
                    None => Cell::Null,
                }
            }
            protocol::TupleData::Binary(_) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Binary format is not supported in tuple data"
                );
            }
            protocol::TupleData::Text(bytes) => {
                let raw = str::from_utf8(&bytes[..])?;
                let decoded = decode_column(&column_schema.typ, column_schema.modifier, raw);
                if decoded.fallback {
                    warn!(
                        column = %column_schema.name,
                        r#type = %column_schema.typ,
                        "column value could not be decoded as its declared type, \
                         carrying it through as text"
                    );
                }

                decoded.cell
            }
        };

        values.push(cell);
    }

    Ok(TableRow::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_postgres::types::Type;

    fn invoice_columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
            ColumnSchema::new(
                "total".to_string(),
                Type::NUMERIC,
                (10 << 16) + 2 + 4,
                false,
            ),
        ]
    }

    fn text_tuple(value: &str) -> protocol::TupleData {
        protocol::TupleData::Text(Bytes::copy_from_slice(value.as_bytes()))
    }

    #[test]
    fn convert_full_tuple() {
        let columns = invoice_columns();
        let tuple_data = vec![text_tuple("1"), text_tuple("19.99")];

        let row = convert_tuple_to_row(&columns, &tuple_data, &mut None).unwrap();

        assert_eq!(row.values[0], Cell::I32(1));
        assert_eq!(
            row.values[1],
            Cell::Numeric("19.99".parse().unwrap())
        );
    }

    #[test]
    fn convert_tuple_with_null() {
        let columns = invoice_columns();
        let tuple_data = vec![text_tuple("1"), protocol::TupleData::Null];

        let row = convert_tuple_to_row(&columns, &tuple_data, &mut None).unwrap();

        assert_eq!(row.values[1], Cell::Null);
    }

    #[test]
    fn convert_tuple_with_unchanged_toast_takes_old_value() {
        let columns = vec![
            ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
            ColumnSchema::new("payload".to_string(), Type::TEXT, -1, false),
        ];
        let tuple_data = vec![text_tuple("1"), protocol::TupleData::UnchangedToast];

        let mut old_row = Some(TableRow::new(vec![
            Cell::I32(1),
            Cell::String("big".to_string()),
        ]));
        let row = convert_tuple_to_row(&columns, &tuple_data, &mut old_row).unwrap();

        assert_eq!(row.values[1], Cell::String("big".to_string()));
        // The old value was moved, not cloned.
        assert_eq!(old_row.unwrap().values[1], Cell::Null);
    }

    #[test]
    fn convert_tuple_with_unchanged_toast_and_no_old_row() {
        let columns = vec![ColumnSchema::new(
            "payload".to_string(),
            Type::TEXT,
            -1,
            false,
        )];
        let tuple_data = vec![protocol::TupleData::UnchangedToast];

        let row = convert_tuple_to_row(&columns, &tuple_data, &mut None).unwrap();

        assert_eq!(row.values[0], Cell::Null);
    }

    #[test]
    fn convert_tuple_with_undecodable_column_still_converts_row() {
        let columns = invoice_columns();
        let tuple_data = vec![text_tuple("1"), text_tuple("nonsense")];

        let row = convert_tuple_to_row(&columns, &tuple_data, &mut None).unwrap();

        assert_eq!(row.values[0], Cell::I32(1));
        assert_eq!(row.values[1], Cell::String("nonsense".to_string()));
    }

    #[test]
    fn convert_tuple_with_missing_column_fails() {
        let columns = invoice_columns();
        let tuple_data = vec![text_tuple("1")];

        let err = convert_tuple_to_row(&columns, &tuple_data, &mut None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
