//! Postgres-specific vocabulary shared across the CDC capture crates.
//!
//! Contains the schema value types announced by the logical replication
//! stream, oid/typmod conversion helpers, and time constants tied to the
//! Postgres wire protocol.

pub mod time;
pub mod types;
