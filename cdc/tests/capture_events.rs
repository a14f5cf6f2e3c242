//! Scenario tests driving the event builder, catalog and policy through the
//! crate's public API, the way a capture pass does message by message.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use postgres_replication::protocol;
use tokio_postgres::types::{PgLsn, Type};

use cdc::destination::{Destination, MemoryDestination};
use cdc::policy::{SOFT_DELETE_COLUMN, WriteDisposition};
use cdc::replication::client::PublicationOperations;
use cdc::replication::consume::EventBuilder;
use cdc::types::{Cell, ColumnSchema, Event, TableId, TableName, TableSchema};

const INVOICE_TABLE_ID: u32 = 16385;

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn invoice_schema() -> TableSchema {
    TableSchema::new(
        TableId::new(INVOICE_TABLE_ID),
        TableName::new("public".to_string(), "invoice".to_string()),
        vec![
            ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
            ColumnSchema::new(
                "total".to_string(),
                Type::NUMERIC,
                (10 << 16) + 2 + 4,
                false,
            ),
        ],
    )
}

fn text(value: &str) -> protocol::TupleData {
    protocol::TupleData::Text(Bytes::copy_from_slice(value.as_bytes()))
}

fn commit_ts() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[tokio::test]
async fn invoice_lifecycle_is_captured_append_only() {
    init_tracing();

    let operations = PublicationOperations::default();
    let mut builder = EventBuilder::new(operations);
    let destination = MemoryDestination::new();

    let table_id = TableId::new(INVOICE_TABLE_ID);
    let commit_lsn = PgLsn::from(100u64);

    // The stream announces the relation before any data message.
    let relation = builder
        .process_relation(PgLsn::from(10u64), commit_lsn, invoice_schema())
        .unwrap();

    // The derived entry is append-only with the soft-delete marker appended,
    // even though the table has a primary key and would merge by default.
    assert_eq!(
        relation.catalog_entry.hints.write_disposition,
        WriteDisposition::Append
    );
    assert!(!relation.catalog_entry.hints.hard_delete);
    assert_eq!(
        relation.catalog_entry.columns.last().unwrap().name,
        SOFT_DELETE_COLUMN
    );

    let insert = builder
        .process_insert(
            PgLsn::from(11u64),
            commit_lsn,
            table_id,
            &[text("1"), text("19.99")],
        )
        .unwrap()
        .unwrap();

    let update = builder
        .process_update(
            PgLsn::from(12u64),
            commit_lsn,
            table_id,
            None,
            None,
            &[text("1"), text("29.99")],
        )
        .unwrap()
        .unwrap();

    let delete = builder
        .process_delete(
            PgLsn::from(13u64),
            commit_lsn,
            table_id,
            None,
            Some(&[text("1"), protocol::TupleData::Null]),
            commit_ts(),
        )
        .unwrap()
        .unwrap();

    destination
        .write_events(vec![
            Event::Relation(relation),
            Event::Insert(insert),
            Event::Update(update),
            Event::Delete(delete),
        ])
        .await
        .unwrap();

    let events = destination.events().await;
    assert_eq!(events.len(), 4);

    // The insert carries the decoded typed row.
    let Event::Insert(insert) = &events[1] else {
        panic!("expected an insert event");
    };
    assert_eq!(insert.table_row.values[0], Cell::I32(1));

    // The update came without a before-image: empty before, populated after.
    let Event::Update(update) = &events[2] else {
        panic!("expected an update event");
    };
    assert!(update.old_table_row.is_none());
    assert_eq!(
        update.table_row.values[1],
        Cell::Numeric("29.99".parse().unwrap())
    );

    // The delete is rendered as an append preserving the key and stamping
    // the soft-delete marker, so the destination keeps every row version.
    let Event::Delete(delete) = &events[3] else {
        panic!("expected a delete event");
    };
    assert_eq!(delete.soft_delete_row.values[0], Cell::I32(1));
    assert_eq!(
        delete.soft_delete_row.values.last().unwrap(),
        &Cell::TimestampTz(commit_ts())
    );
}

#[test]
fn mid_stream_schema_replacement_redecodes_rows() {
    init_tracing();

    let mut builder = EventBuilder::new(PublicationOperations::default());
    let table_id = TableId::new(INVOICE_TABLE_ID);

    builder
        .process_relation(PgLsn::from(10u64), PgLsn::from(100u64), invoice_schema())
        .unwrap();

    // The table is altered mid-stream: total becomes plain text.
    let altered = TableSchema::new(
        table_id,
        TableName::new("public".to_string(), "invoice".to_string()),
        vec![
            ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
            ColumnSchema::new("total".to_string(), Type::TEXT, -1, false),
        ],
    );
    let relation = builder
        .process_relation(PgLsn::from(20u64), PgLsn::from(200u64), altered)
        .unwrap();

    // The catalog entry was rebuilt from the replaced schema.
    assert_eq!(relation.catalog_entry.columns.len(), 3);

    let insert = builder
        .process_insert(
            PgLsn::from(21u64),
            PgLsn::from(200u64),
            table_id,
            &[text("2"), text("19.99")],
        )
        .unwrap()
        .unwrap();

    assert_eq!(insert.table_row.values[1], Cell::String("19.99".to_string()));
}

#[test]
fn truncate_without_publication_support_yields_no_event() {
    init_tracing();

    let mut builder = EventBuilder::new(PublicationOperations::default());
    builder
        .process_relation(PgLsn::from(10u64), PgLsn::from(100u64), invoice_schema())
        .unwrap();

    let event = builder.process_truncate(
        PgLsn::from(11u64),
        PgLsn::from(100u64),
        0,
        &[INVOICE_TABLE_ID],
    );

    assert!(event.is_none());
}
