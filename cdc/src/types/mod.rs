//! Core value and event types produced by the capture stream.

mod cell;
mod event;
mod table_row;

pub use cell::Cell;
pub use event::{
    BeginEvent, CommitEvent, DeleteEvent, Event, EventType, InsertEvent, RelationEvent,
    TruncateEvent, UpdateEvent,
};
pub use table_row::TableRow;

// Re-exported for convenience since almost every consumer of the event types
// needs the table identifiers as well.
pub use cdc_postgres::types::{ColumnSchema, TableId, TableName, TableSchema};
