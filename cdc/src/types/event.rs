use cdc_postgres::types::{TableId, TableSchema};
use std::fmt;
use std::sync::Arc;
use tokio_postgres::types::PgLsn;

use crate::catalog::CatalogEntry;
use crate::types::TableRow;

/// Transaction begin event from Postgres logical replication.
///
/// [`BeginEvent`] marks the start of a new transaction in the replication
/// stream. The timestamp is the transaction's commit timestamp in Postgres
/// format (microseconds since the Postgres epoch).
#[derive(Debug, Clone, PartialEq)]
pub struct BeginEvent {
    /// LSN position where the transaction started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction will commit.
    pub commit_lsn: PgLsn,
    /// Transaction commit timestamp in Postgres format.
    pub timestamp: i64,
    /// Transaction ID for tracking and coordination.
    pub xid: u32,
}

/// Transaction commit event from Postgres logical replication.
///
/// [`CommitEvent`] marks the successful completion of a transaction in the
/// replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// LSN position where the transaction started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction committed.
    pub commit_lsn: PgLsn,
    /// Transaction commit flags from Postgres.
    pub flags: i8,
    /// Final LSN position after the transaction.
    pub end_lsn: u64,
    /// Transaction commit timestamp in Postgres format.
    pub timestamp: i64,
}

/// Table schema definition event from Postgres logical replication.
///
/// [`RelationEvent`] announces the schema now in effect for a table. Every
/// data event for the same table id that follows must be interpreted against
/// this schema until the next relation event replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationEvent {
    /// LSN position where the event started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction of this event will commit.
    pub commit_lsn: PgLsn,
    /// ID of the table this schema belongs to.
    pub table_id: TableId,
    /// The announced table schema.
    pub table_schema: Arc<TableSchema>,
    /// The destination-facing entry derived from the schema, already shaped
    /// by the write-disposition policy.
    pub catalog_entry: Arc<CatalogEntry>,
}

/// Row insertion event from Postgres logical replication.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertEvent {
    /// LSN position where the event started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction of this event will commit.
    pub commit_lsn: PgLsn,
    /// ID of the table where the row was inserted.
    pub table_id: TableId,
    /// Complete row data for the inserted row.
    pub table_row: TableRow,
}

/// Row update event from Postgres logical replication.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    /// LSN position where the event started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction of this event will commit.
    pub commit_lsn: PgLsn,
    /// ID of the table where the row was updated.
    pub table_id: TableId,
    /// New row data after the update.
    pub table_row: TableRow,
    /// Previous row data before the update.
    ///
    /// The boolean indicates whether the row contains only key columns
    /// (`true`) or the complete row data (`false`), depending on the table's
    /// `REPLICA IDENTITY` setting. [`None`] means the stream sent no
    /// before-image at all: downstream must treat the update as a full
    /// overwrite by primary key.
    pub old_table_row: Option<(bool, TableRow)>,
}

/// Row deletion event from Postgres logical replication.
///
/// Under the append-only write disposition a delete is never applied as a
/// row removal. [`DeleteEvent`] therefore carries, next to the replica
/// identity image the protocol sent, the soft-delete rendering the loader is
/// expected to append: the identity columns followed by the `deleted_ts`
/// marker, in the catalog entry's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteEvent {
    /// LSN position where the event started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction of this event will commit.
    pub commit_lsn: PgLsn,
    /// ID of the table where the row was deleted.
    pub table_id: TableId,
    /// Data from the deleted row.
    ///
    /// The boolean indicates whether the row contains only key columns
    /// (`true`) or the complete row data (`false`). This depends on the
    /// Postgres `REPLICA IDENTITY` setting for the table.
    pub old_table_row: Option<(bool, TableRow)>,
    /// The append-only rendering of this delete: the identity image extended
    /// with a non-null soft-delete timestamp.
    pub soft_delete_row: TableRow,
}

/// Table truncation event from Postgres logical replication.
///
/// [`TruncateEvent`] is a marker only: it names the truncated tables and
/// carries no row payload and no destination truncation hint.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncateEvent {
    /// LSN position where the event started.
    pub start_lsn: PgLsn,
    /// LSN position where the transaction of this event will commit.
    pub commit_lsn: PgLsn,
    /// Truncate operation options from Postgres.
    pub options: i8,
    /// List of table IDs that were truncated in this operation.
    pub table_ids: Vec<TableId>,
}

/// Represents a single replication event from Postgres logical replication.
///
/// [`Event`] encapsulates all possible events that can occur in the capture
/// stream, including data modification events and transaction control events.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transaction begin event marking the start of a new transaction.
    Begin(BeginEvent),
    /// Transaction commit event marking successful transaction completion.
    Commit(CommitEvent),
    /// Row insertion event with new row data.
    Insert(InsertEvent),
    /// Row update event with old and new row data.
    Update(UpdateEvent),
    /// Row deletion event with its soft-delete rendering.
    Delete(DeleteEvent),
    /// Relation schema information event describing table structure.
    Relation(RelationEvent),
    /// Table truncation marker event.
    Truncate(TruncateEvent),
}

impl Event {
    /// Returns the [`EventType`] that corresponds to this event.
    pub fn event_type(&self) -> EventType {
        self.into()
    }

    /// Returns true if the event is associated with the specified table.
    ///
    /// Transaction control events (Begin/Commit) are not associated with
    /// specific tables and will always return false.
    pub fn has_table_id(&self, table_id: &TableId) -> bool {
        match self {
            Event::Insert(insert_event) => insert_event.table_id == *table_id,
            Event::Update(update_event) => update_event.table_id == *table_id,
            Event::Delete(delete_event) => delete_event.table_id == *table_id,
            Event::Relation(relation_event) => relation_event.table_id == *table_id,
            Event::Truncate(event) => event.table_ids.contains(table_id),
            _ => false,
        }
    }
}

/// Classification of replication event types.
///
/// [`EventType`] provides a lightweight enumeration of possible replication
/// events without carrying the associated data. This is useful for filtering,
/// routing, and processing decisions based on event type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Transaction begin marker.
    Begin,
    /// Transaction commit marker.
    Commit,
    /// Row insertion operation.
    Insert,
    /// Row update operation.
    Update,
    /// Row deletion operation.
    Delete,
    /// Table schema definition.
    Relation,
    /// Table truncation operation.
    Truncate,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "Begin"),
            Self::Commit => write!(f, "Commit"),
            Self::Insert => write!(f, "Insert"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
            Self::Relation => write!(f, "Relation"),
            Self::Truncate => write!(f, "Truncate"),
        }
    }
}

impl From<&Event> for EventType {
    fn from(event: &Event) -> Self {
        match event {
            Event::Begin(_) => EventType::Begin,
            Event::Commit(_) => EventType::Commit,
            Event::Insert(_) => EventType::Insert,
            Event::Update(_) => EventType::Update,
            Event::Delete(_) => EventType::Delete,
            Event::Relation(_) => EventType::Relation,
            Event::Truncate(_) => EventType::Truncate,
        }
    }
}

impl From<Event> for EventType {
    fn from(event: Event) -> Self {
        (&event).into()
    }
}
