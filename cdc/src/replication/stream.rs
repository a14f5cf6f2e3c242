use cdc_postgres::time::POSTGRES_EPOCH;
use futures::Stream;
use pin_project_lite::pin_project;
use postgres_replication::LogicalReplicationStream;
use postgres_replication::protocol::{LogicalReplicationMessage, ReplicationMessage};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_postgres::types::PgLsn;
use tracing::debug;

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};

/// The amount of milliseconds between two consecutive status updates in case
/// no forced update is requested.
const STATUS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

pin_project! {
    /// A stream of replication messages that also reports consumption
    /// progress back to the server.
    ///
    /// Wraps a [`LogicalReplicationStream`] and owns the standby status
    /// update bookkeeping: updates are throttled so that the server is not
    /// flooded by per-message acknowledgments, but a forced update (server
    /// requested a reply, or the session is closing) always goes out.
    /// Without these updates the slot retains WAL forever and the server's
    /// disk usage grows without bound.
    pub struct EventsStream {
        #[pin]
        stream: LogicalReplicationStream,
        last_update: Option<Instant>,
        last_flush_lsn: Option<PgLsn>,
        last_apply_lsn: Option<PgLsn>,
    }
}

impl EventsStream {
    /// Creates a new [`EventsStream`] from a [`LogicalReplicationStream`].
    pub fn wrap(stream: LogicalReplicationStream) -> Self {
        Self {
            stream,
            last_update: None,
            last_flush_lsn: None,
            last_apply_lsn: None,
        }
    }

    /// Sends a status update to the Postgres server.
    ///
    /// The three LSN values have distinct meanings in the replication
    /// protocol:
    /// - `write_lsn`: last position received by the client
    /// - `flush_lsn`: last position durably processed downstream
    /// - `apply_lsn`: last position whose effects are visible downstream
    ///
    /// For this consumer `flush_lsn` and `apply_lsn` are identical, the
    /// position up to which events were handed to the destination.
    ///
    /// Unforced updates are skipped while neither flushed nor applied
    /// positions changed and the previous update is younger than
    /// [`STATUS_UPDATE_INTERVAL`]. `write_lsn` changes alone do not trigger
    /// an update since it advances on every incoming message.
    pub async fn send_status_update(
        self: Pin<&mut Self>,
        write_lsn: PgLsn,
        flush_lsn: PgLsn,
        apply_lsn: PgLsn,
        force: bool,
    ) -> CdcResult<()> {
        let this = self.project();

        if !force
            && let (Some(last_update), Some(last_flush), Some(last_apply)) = (
                this.last_update.as_mut(),
                this.last_flush_lsn.as_mut(),
                this.last_apply_lsn.as_mut(),
            )
            && flush_lsn == *last_flush
            && apply_lsn == *last_apply
            && last_update.elapsed() < STATUS_UPDATE_INTERVAL
        {
            return Ok(());
        }

        // The client's system clock at the time of transmission, as
        // microseconds since midnight on 2000-01-01.
        let ts = POSTGRES_EPOCH
            .elapsed()
            .map_err(|e| {
                cdc_error!(
                    ErrorKind::InvalidState,
                    "Invalid Postgres epoch",
                    e.to_string()
                )
            })?
            .as_micros() as i64;

        this.stream
            .standby_status_update(write_lsn, flush_lsn, apply_lsn, ts, 0)
            .await?;

        debug!(
            "status update successfully sent (write_lsn = {}, flush_lsn = {}, apply_lsn = {})",
            write_lsn, flush_lsn, apply_lsn
        );

        *this.last_update = Some(Instant::now());
        *this.last_flush_lsn = Some(flush_lsn);
        *this.last_apply_lsn = Some(apply_lsn);

        Ok(())
    }
}

impl Stream for EventsStream {
    type Item = CdcResult<ReplicationMessage<LogicalReplicationMessage>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.stream.poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
