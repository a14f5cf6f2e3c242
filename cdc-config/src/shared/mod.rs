//! Shared configuration types for CDC capture sessions.

mod batch;
mod capture;
mod connection;
mod replication;

use thiserror::Error;

pub use batch::BatchConfig;
pub use capture::CaptureConfig;
pub use connection::{PgConnectionConfig, TcpKeepaliveConfig, TlsConfig};
pub use replication::{LsnBound, ReplicationConfig};

/// Errors raised when a configuration fails validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for field '{field}': {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: &'static str,
    },
    /// TLS was enabled without any trusted root certificates.
    #[error("trusted root certificates must be set when tls is enabled")]
    MissingTrustedRootCerts,
}
