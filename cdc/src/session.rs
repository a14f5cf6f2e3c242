//! The capture session: one finite pass over the replication stream.
//!
//! A [`CaptureSession`] is the explicit session object tying the pieces
//! together: it validates the configuration, connects the replication client,
//! runs the idempotent session initializer, resolves the upper-bound log
//! position and drives the consume loop. All state lives in the session; no
//! ambient process-wide configuration is consulted.

use cdc_config::shared::{CaptureConfig, LsnBound};
use std::str::FromStr;
use std::sync::Arc;
use tokio_postgres::types::PgLsn;
use tracing::info;

use crate::cdc_error;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::destination::Destination;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::client::PgReplicationClient;
use crate::replication::consume::{ConsumeLoop, ConsumeLoopResult, ConsumeSummary};
use crate::replication::init::ensure_replication_session;

/// Outcome of a finished capture pass.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Whether the pass read up to its bound or was stopped early.
    pub result: ConsumeLoopResult,
    /// Number of events handed to the destination.
    pub events_written: u64,
    /// The log position acknowledged to the server; the next pass resumes
    /// from here.
    pub last_acked_lsn: PgLsn,
    /// The upper bound this pass ran against.
    pub upto_lsn: PgLsn,
}

/// A single capture pass from a Postgres replication slot to a destination.
#[derive(Debug)]
pub struct CaptureSession<D> {
    config: Arc<CaptureConfig>,
    destination: D,
    shutdown_tx: ShutdownTx,
}

impl<D> CaptureSession<D>
where
    D: Destination + Clone + Send + Sync + 'static,
{
    /// Creates a new capture session from an explicit configuration.
    pub fn new(config: CaptureConfig, destination: D) -> Self {
        // We create a watch channel of unit type since this is just used to
        // notify all subscribers that shutdown is needed.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            destination,
            shutdown_tx,
        }
    }

    /// Returns a handle that can stop the session from another task.
    ///
    /// The loop stops at the next safe point and still flushes its final
    /// acknowledgment before closing.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the capture pass to completion.
    ///
    /// Performs session initialization (idempotent publication and slot
    /// setup), resolves the upper-bound log position, then consumes the
    /// stream until the bound is reached or shutdown is requested.
    pub async fn run(self) -> CdcResult<CaptureReport> {
        self.config.validate().map_err(|err| {
            cdc_error!(
                ErrorKind::ConfigError,
                "Invalid capture configuration",
                source: err
            )
        })?;

        info!(
            slot = %self.config.replication.slot_name,
            publication = %self.config.replication.publication_name,
            "starting capture session"
        );

        let replication_client =
            PgReplicationClient::connect(self.config.pg_connection.clone()).await?;

        let initialized =
            ensure_replication_session(&replication_client, &self.config.replication).await?;

        let upto_lsn = self.resolve_upto_lsn(&replication_client).await?;
        info!(
            start_lsn = %initialized.start_lsn,
            %upto_lsn,
            "capture pass bounds resolved"
        );

        let summary: ConsumeSummary = ConsumeLoop::start(
            self.config.clone(),
            replication_client,
            initialized.operations,
            initialized.start_lsn,
            upto_lsn,
            self.destination.clone(),
            self.shutdown_tx.subscribe(),
        )
        .await?;

        self.destination.shutdown().await?;

        info!(
            events_written = summary.events_written,
            last_acked_lsn = %summary.last_acked_lsn,
            "capture session finished"
        );

        Ok(CaptureReport {
            result: summary.result,
            events_written: summary.events_written,
            last_acked_lsn: summary.last_acked_lsn,
            upto_lsn,
        })
    }

    /// Resolves the upper bound of this pass from the configuration.
    async fn resolve_upto_lsn(&self, client: &PgReplicationClient) -> CdcResult<PgLsn> {
        match &self.config.replication.upto {
            LsnBound::CurrentWalLsn => client.current_wal_lsn().await,
            LsnBound::Explicit(lsn) => PgLsn::from_str(lsn).map_err(|_| {
                cdc_error!(
                    ErrorKind::ConfigError,
                    "Invalid upper-bound LSN",
                    format!("'{lsn}' is not a valid log sequence number")
                )
            }),
        }
    }
}
