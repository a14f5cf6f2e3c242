use serde::Deserialize;

use crate::shared::{BatchConfig, PgConnectionConfig, ReplicationConfig, ValidationError};

/// Configuration for a CDC capture session.
///
/// Aggregates the source connection, the replication session settings and the
/// batching parameters. One [`CaptureConfig`] describes one capture pass.
///
/// This intentionally does not implement `Serialize` to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Clone, Debug, Deserialize)]
pub struct CaptureConfig {
    /// The connection configuration for the Postgres instance the session
    /// captures from.
    pub pg_connection: PgConnectionConfig,
    /// Replication slot, publication and table settings.
    pub replication: ReplicationConfig,
    /// Batch processing configuration.
    #[serde(default)]
    pub batch: BatchConfig,
}

impl CaptureConfig {
    /// Validates capture configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pg_connection.tls.validate()?;
        self.replication.validate()?;
        self.batch.validate()?;

        Ok(())
    }
}
