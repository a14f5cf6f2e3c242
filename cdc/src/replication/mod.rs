//! Postgres logical replication support for the capture core.
//!
//! The module is organized into several key components:
//! - [`client`] - Postgres replication protocol client
//! - [`init`] - idempotent publication and slot setup
//! - [`stream`] - WAL event streaming and progress acknowledgment
//! - [`consume`] - the bounded consume loop producing change events

pub mod client;
pub mod consume;
pub mod init;
pub mod stream;
