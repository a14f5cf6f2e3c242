use cdc_config::shared::ReplicationConfig;
use tokio_postgres::types::PgLsn;
use tracing::info;

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::client::{PgReplicationClient, PublicationOperations};

/// State established by [`ensure_replication_session`].
#[derive(Debug, Clone)]
pub struct InitializedSession {
    /// The LSN the stream should start from: the slot's confirmed position
    /// for an existing slot, or the consistent point of a freshly created
    /// one.
    pub start_lsn: PgLsn,
    /// The operation kinds the publication forwards.
    pub operations: PublicationOperations,
}

/// Ensures the publication and the replication slot for a capture session
/// exist.
///
/// Safe to call on every pipeline invocation: an existing publication or slot
/// is reused as-is. In particular, a publication whose table set has drifted
/// from the configured `table_names` is left alone — divergence is a
/// configuration concern, not auto-healed.
///
/// Any database error is fatal and surfaces as
/// [`ErrorKind::InitializationFailed`]; the caller aborts the run without
/// partial retry.
pub async fn ensure_replication_session(
    client: &PgReplicationClient,
    config: &ReplicationConfig,
) -> CdcResult<InitializedSession> {
    let result = ensure_replication_session_inner(client, config).await;

    result.map_err(|err| {
        cdc_error!(
            ErrorKind::InitializationFailed,
            "Replication session setup failed",
            source: err
        )
    })
}

async fn ensure_replication_session_inner(
    client: &PgReplicationClient,
    config: &ReplicationConfig,
) -> CdcResult<InitializedSession> {
    if client.publication_exists(&config.publication_name).await? {
        info!("using existing publication '{}'", config.publication_name);
    } else {
        info!(
            "creating publication '{}' for {} table(s) in schema '{}'",
            config.publication_name,
            config.table_names.len(),
            config.schema_name
        );

        client
            .create_publication(
                &config.publication_name,
                &config.schema_name,
                &config.table_names,
            )
            .await?;
    }

    let operations = client
        .get_publication_operations(&config.publication_name)
        .await?;

    let slot = client.get_or_create_slot(&config.slot_name).await?;
    let start_lsn = slot.get_start_lsn();

    info!(
        %start_lsn,
        "replication session initialized for slot '{}'", config.slot_name
    );

    Ok(InitializedSession {
        start_lsn,
        operations,
    })
}
