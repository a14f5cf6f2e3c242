//! The bounded consume loop over the logical replication stream.
//!
//! Processes replication messages strictly sequentially: relation messages
//! update the catalog before any dependent decode, data messages become typed
//! change events, and progress is acknowledged back to the server so retained
//! WAL can be reclaimed. One invocation reads up to the log position fixed at
//! session start and then stops, flushing the last acknowledgment even when
//! the stop comes early from the shutdown signal.

use cdc_config::shared::CaptureConfig;
use cdc_postgres::time::postgres_micros_to_unix_micros;
use cdc_postgres::types::{TableId, TableSchema};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use postgres_replication::protocol;
use postgres_replication::protocol::{LogicalReplicationMessage, ReplicationMessage};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::pin;
use tokio_postgres::types::PgLsn;
use tracing::{debug, info, warn};

use crate::catalog::RelationCatalog;
use crate::concurrency::shutdown::ShutdownRx;
use crate::conversions::event::{
    build_table_schema_from_relation_message, convert_tuple_to_row,
    parse_event_from_begin_message, parse_event_from_commit_message,
};
use crate::destination::Destination;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::client::{PgReplicationClient, PublicationOperations};
use crate::replication::stream::EventsStream;
use crate::types::{
    Cell, DeleteEvent, Event, InsertEvent, RelationEvent, TableRow, TruncateEvent, UpdateEvent,
};
use crate::{bail, cdc_error};

/// The reason a consume loop ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumeLoopResult {
    /// The configured upper-bound log position was reached.
    Completed,
    /// The loop was stopped by the shutdown signal.
    Stopped,
}

/// Summary of a finished consume loop.
#[derive(Debug, Clone)]
pub struct ConsumeSummary {
    /// Why the loop ended.
    pub result: ConsumeLoopResult,
    /// Number of events handed to the destination.
    pub events_written: u64,
    /// The position acknowledged to the server in the final status update;
    /// the next invocation resumes from here.
    pub last_acked_lsn: PgLsn,
}

/// Builds typed change events from decoded replication messages.
///
/// Owns the relation catalog and the publication operation flags; every data
/// message flows through here so that schema lookups, operation gating and
/// the write-disposition policy are applied in one place.
pub struct EventBuilder {
    catalog: RelationCatalog,
    operations: PublicationOperations,
}

impl EventBuilder {
    /// Creates a builder validating the stream against the given publication
    /// operations.
    pub fn new(operations: PublicationOperations) -> Self {
        Self {
            catalog: RelationCatalog::new(),
            operations,
        }
    }

    /// Returns the relation catalog.
    pub fn catalog(&self) -> &RelationCatalog {
        &self.catalog
    }

    /// Handles a relation announcement: replaces the stored schema for the
    /// identifier and emits the relation event carrying the rebuilt catalog
    /// entry.
    pub fn process_relation(
        &mut self,
        start_lsn: PgLsn,
        commit_lsn: PgLsn,
        table_schema: TableSchema,
    ) -> CdcResult<RelationEvent> {
        let table_id = table_schema.id;
        let table_schema = self.catalog.on_relation_message(table_schema);
        let catalog_entry = self.catalog.entry(&table_id)?;

        Ok(RelationEvent {
            start_lsn,
            commit_lsn,
            table_id,
            table_schema,
            catalog_entry,
        })
    }

    /// Builds an insert event from the new tuple of an INSERT message.
    ///
    /// Returns [`None`] when the publication does not forward inserts: such a
    /// message is a protocol-consistency failure that is logged and skipped.
    pub fn process_insert(
        &mut self,
        start_lsn: PgLsn,
        commit_lsn: PgLsn,
        table_id: TableId,
        new_tuple: &[protocol::TupleData],
    ) -> CdcResult<Option<InsertEvent>> {
        if !self.operations.insert {
            warn!(%table_id, "received INSERT for a publication without insert, skipping message");
            return Ok(None);
        }

        let table_schema = self.catalog.get(&table_id)?.clone();
        let table_row = convert_tuple_to_row(&table_schema.column_schemas, new_tuple, &mut None)?;

        Ok(Some(InsertEvent {
            start_lsn,
            commit_lsn,
            table_id,
            table_row,
        }))
    }

    /// Builds an update event from the tuples of an UPDATE message.
    ///
    /// The old row is taken from the full old tuple when the table's replica
    /// identity provides one, or from the key tuple otherwise. When neither
    /// is present the event carries no before-image and downstream must treat
    /// it as a full overwrite by primary key.
    pub fn process_update(
        &mut self,
        start_lsn: PgLsn,
        commit_lsn: PgLsn,
        table_id: TableId,
        old_tuple: Option<&[protocol::TupleData]>,
        key_tuple: Option<&[protocol::TupleData]>,
        new_tuple: &[protocol::TupleData],
    ) -> CdcResult<Option<UpdateEvent>> {
        if !self.operations.update {
            warn!(%table_id, "received UPDATE for a publication without update, skipping message");
            return Ok(None);
        }

        let table_schema = self.catalog.get(&table_id)?.clone();

        // We try to extract the old tuple by either taking the entire old
        // tuple or the key of the old tuple.
        let is_key = old_tuple.is_none();
        let identity = old_tuple.or(key_tuple);
        let old_table_row = match identity {
            Some(identity) => Some(convert_tuple_to_row(
                &table_schema.column_schemas,
                identity,
                &mut None,
            )?),
            None => None,
        };

        let mut old_table_row_mut = old_table_row;
        let table_row = convert_tuple_to_row(
            &table_schema.column_schemas,
            new_tuple,
            &mut old_table_row_mut,
        )?;

        let old_table_row = old_table_row_mut.map(|row| (is_key, row));

        Ok(Some(UpdateEvent {
            start_lsn,
            commit_lsn,
            table_id,
            table_row,
            old_table_row,
        }))
    }

    /// Builds a delete event from the replica-identity image of a DELETE
    /// message.
    ///
    /// The append-only policy turns the delete into a re-appended row: the
    /// identity image is extended with the soft-delete marker stamped with
    /// the transaction's commit timestamp, and the resulting row is attached
    /// to the event for the loader to append.
    pub fn process_delete(
        &mut self,
        start_lsn: PgLsn,
        commit_lsn: PgLsn,
        table_id: TableId,
        old_tuple: Option<&[protocol::TupleData]>,
        key_tuple: Option<&[protocol::TupleData]>,
        deleted_at: DateTime<Utc>,
    ) -> CdcResult<Option<DeleteEvent>> {
        if !self.operations.delete {
            warn!(%table_id, "received DELETE for a publication without delete, skipping message");
            return Ok(None);
        }

        let table_schema = self.catalog.get(&table_id)?.clone();
        let catalog_entry = self.catalog.entry(&table_id)?;

        let is_key = old_tuple.is_none();
        let identity = old_tuple.or(key_tuple);
        let old_table_row = match identity {
            Some(identity) => Some(convert_tuple_to_row(
                &table_schema.column_schemas,
                identity,
                &mut None,
            )?),
            None => None,
        };

        // The soft-delete rendering follows the catalog entry's column order:
        // the relation columns first, the marker column last.
        let mut soft_delete_values = match &old_table_row {
            Some(row) => row.values.clone(),
            None => vec![Cell::Null; table_schema.column_schemas.len()],
        };
        soft_delete_values.push(Cell::TimestampTz(deleted_at));
        debug_assert_eq!(soft_delete_values.len(), catalog_entry.columns.len());

        let old_table_row = old_table_row.map(|row| (is_key, row));

        Ok(Some(DeleteEvent {
            start_lsn,
            commit_lsn,
            table_id,
            old_table_row,
            soft_delete_row: TableRow::new(soft_delete_values),
        }))
    }

    /// Builds a truncate marker event, provided the publication forwards
    /// truncates.
    ///
    /// Relations the catalog has never seen are a protocol violation for data
    /// messages, but a truncate carries no row payload, so unknown
    /// identifiers are passed through untouched.
    pub fn process_truncate(
        &mut self,
        start_lsn: PgLsn,
        commit_lsn: PgLsn,
        options: i8,
        rel_ids: &[u32],
    ) -> Option<TruncateEvent> {
        if !self.operations.truncate {
            warn!("received TRUNCATE for a publication without truncate, skipping message");
            return None;
        }

        Some(TruncateEvent {
            start_lsn,
            commit_lsn,
            options,
            table_ids: rel_ids.iter().map(|id| TableId::new(*id)).collect(),
        })
    }
}

/// Result returned from `handle_replication_message` and related functions.
#[derive(Debug, Default)]
struct HandleMessageResult {
    /// The event converted from the replication message.
    event: Option<Event>,
    /// Set to a commit message's end_lsn value, `None` otherwise.
    end_lsn: Option<PgLsn>,
    /// Set when the upper bound was reached and the loop should finish.
    end_of_stream: bool,
}

impl HandleMessageResult {
    /// Creates a result with no event and no side effects.
    fn no_event() -> Self {
        Self::default()
    }

    /// Creates a result that returns an event without affecting loop state.
    fn return_event(event: Event) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }
}

/// Internal state tracked throughout the consume loop.
#[derive(Debug)]
struct ConsumeLoopState {
    /// The highest LSN received from the server so far.
    last_received_lsn: PgLsn,
    /// The highest commit end LSN whose events were handed to the
    /// destination; this is the position acknowledged to the server.
    last_flushed_lsn: PgLsn,
    /// The highest commit end LSN fully processed, flushed or not.
    last_commit_end_lsn: Option<PgLsn>,
    /// The commit LSN of the transaction currently being processed.
    remote_final_lsn: Option<PgLsn>,
    /// The commit timestamp of the transaction currently being processed.
    remote_commit_ts: Option<DateTime<Utc>>,
    /// A batch of events to send to the destination.
    events_batch: Vec<Event>,
    /// The deadline by which the current batch must be flushed.
    batch_flush_deadline: Option<Instant>,
    /// The maximum duration to wait before forcibly flushing a batch.
    max_batch_fill_duration: Duration,
    /// Number of events handed to the destination so far.
    events_written: u64,
}

impl ConsumeLoopState {
    fn new(start_lsn: PgLsn, max_batch_size: usize, max_batch_fill_duration: Duration) -> Self {
        Self {
            last_received_lsn: start_lsn,
            last_flushed_lsn: start_lsn,
            last_commit_end_lsn: None,
            remote_final_lsn: None,
            remote_commit_ts: None,
            events_batch: Vec::with_capacity(max_batch_size),
            batch_flush_deadline: None,
            max_batch_fill_duration,
            events_written: 0,
        }
    }

    /// Updates the last received LSN to a higher value if the new LSN is
    /// greater. The position never rewinds within a session.
    fn update_last_received_lsn(&mut self, new_lsn: PgLsn) {
        if new_lsn > self.last_received_lsn {
            self.last_received_lsn = new_lsn;
        }
    }

    /// Starts the batch flush timer if not already running.
    fn start_batch_timer_if_needed(&mut self) {
        if self.batch_flush_deadline.is_some() {
            return;
        }

        self.batch_flush_deadline = Some(Instant::now() + self.max_batch_fill_duration);
    }

    /// Returns true if the loop is in the middle of processing a transaction.
    fn handling_transaction(&self) -> bool {
        self.remote_final_lsn.is_some()
    }

    /// Returns the effective flush LSN that should be reported to the server.
    ///
    /// While a transaction is open or events await flushing, only the last
    /// flushed commit boundary may be acknowledged; otherwise everything
    /// received so far has been fully handled.
    fn effective_flush_lsn(&self) -> PgLsn {
        if !self.handling_transaction() && self.events_batch.is_empty() {
            self.last_received_lsn
        } else {
            self.last_flushed_lsn
        }
    }
}

/// The consume loop: reads the replication stream up to a bounded position
/// and hands typed change events to the destination in batches.
pub struct ConsumeLoop<D> {
    config: Arc<CaptureConfig>,
    builder: EventBuilder,
    destination: D,
    shutdown_rx: ShutdownRx,
    upto_lsn: PgLsn,
    state: ConsumeLoopState,
}

impl<D> ConsumeLoop<D>
where
    D: Destination + Send + Sync,
{
    /// Starts the consume loop for processing replication events.
    ///
    /// This is the main entry point that creates the loop instance and runs
    /// it until the bound is reached or shutdown is requested.
    pub async fn start(
        config: Arc<CaptureConfig>,
        replication_client: PgReplicationClient,
        operations: PublicationOperations,
        start_lsn: PgLsn,
        upto_lsn: PgLsn,
        destination: D,
        shutdown_rx: ShutdownRx,
    ) -> CdcResult<ConsumeSummary> {
        info!(%start_lsn, %upto_lsn, "starting consume loop");

        let state = ConsumeLoopState::new(
            start_lsn,
            config.batch.max_size,
            Duration::from_millis(config.batch.max_fill_ms),
        );

        let mut consume_loop = Self {
            config: config.clone(),
            builder: EventBuilder::new(operations),
            destination,
            shutdown_rx,
            upto_lsn,
            state,
        };

        consume_loop.run(replication_client, start_lsn).await
    }

    /// Runs the main event processing loop.
    async fn run(
        &mut self,
        replication_client: PgReplicationClient,
        start_lsn: PgLsn,
    ) -> CdcResult<ConsumeSummary> {
        let logical_replication_stream = replication_client
            .start_logical_replication(
                &self.config.replication.publication_name,
                &self.config.replication.slot_name,
                start_lsn,
            )
            .await?;

        let events_stream = EventsStream::wrap(logical_replication_stream);
        pin!(events_stream);

        loop {
            tokio::select! {
                biased;

                // PRIORITY 1: Handle the shutdown signal. The last
                // acknowledgment is still flushed before closing.
                _ = self.shutdown_rx.changed() => {
                    info!("shutdown requested, stopping consume loop");

                    return self.finish(events_stream.as_mut(), ConsumeLoopResult::Stopped).await;
                }

                // PRIORITY 2: Handle batch flush timer expiry.
                _ = async {
                    match self.state.batch_flush_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                        None => std::future::pending().await,
                    }
                } => {
                    debug!(
                        batch_size = self.state.events_batch.len(),
                        "batch flush timer expired, flushing batch",
                    );

                    self.flush_batch().await?;
                }

                // PRIORITY 3: Process incoming replication messages.
                message = events_stream.next() => {
                    let Some(message) = message else {
                        if replication_client.is_closed() {
                            warn!("replication stream ended due to closed postgres connection");
                            bail!(
                                ErrorKind::SourceConnectionFailed,
                                "Postgres connection has been closed during the consume loop",
                                format!(
                                    "Last acknowledged position: {}",
                                    self.state.last_flushed_lsn
                                )
                            )
                        } else {
                            warn!("replication stream ended unexpectedly");
                            bail!(
                                ErrorKind::SourceConnectionFailed,
                                "Replication stream ended unexpectedly during the consume loop",
                                format!(
                                    "Last acknowledged position: {}",
                                    self.state.last_flushed_lsn
                                )
                            )
                        }
                    };

                    let message = message.map_err(|err| {
                        cdc_error!(
                            ErrorKind::SourceConnectionFailed,
                            "Reading from the replication stream failed",
                            format!(
                                "Last acknowledged position: {}",
                                self.state.last_flushed_lsn
                            ),
                            source: err
                        )
                    })?;

                    let end_of_stream = self
                        .handle_replication_message(events_stream.as_mut(), message)
                        .await?;

                    if !self.state.events_batch.is_empty() {
                        self.state.start_batch_timer_if_needed();
                    }

                    if end_of_stream {
                        info!(upto_lsn = %self.upto_lsn, "upper bound reached, stopping consume loop");

                        return self
                            .finish(events_stream.as_mut(), ConsumeLoopResult::Completed)
                            .await;
                    }
                }
            }
        }
    }

    /// Flushes outstanding events and sends the final forced status update
    /// before returning the loop summary.
    async fn finish(
        &mut self,
        events_stream: Pin<&mut EventsStream>,
        result: ConsumeLoopResult,
    ) -> CdcResult<ConsumeSummary> {
        self.flush_batch().await?;

        let flush_lsn = self.state.effective_flush_lsn();
        events_stream
            .send_status_update(self.state.last_received_lsn, flush_lsn, flush_lsn, true)
            .await?;

        Ok(ConsumeSummary {
            result,
            events_written: self.state.events_written,
            last_acked_lsn: flush_lsn,
        })
    }

    /// Sends the current batch of events to the destination and advances the
    /// flushed position to the last fully processed commit boundary.
    async fn flush_batch(&mut self) -> CdcResult<()> {
        self.state.batch_flush_deadline = None;

        if self.state.events_batch.is_empty() {
            return Ok(());
        }

        let events_batch = std::mem::replace(
            &mut self.state.events_batch,
            Vec::with_capacity(self.config.batch.max_size),
        );

        let batch_size = events_batch.len();
        debug!(batch_size, "sending batch to destination");

        self.destination.write_events(events_batch).await?;
        self.state.events_written += batch_size as u64;

        if let Some(last_commit_end_lsn) = self.state.last_commit_end_lsn
            && last_commit_end_lsn > self.state.last_flushed_lsn
        {
            self.state.last_flushed_lsn = last_commit_end_lsn;
        }

        Ok(())
    }

    /// Dispatches replication protocol messages to appropriate handlers.
    ///
    /// Returns `true` when the upper bound was reached.
    async fn handle_replication_message(
        &mut self,
        events_stream: Pin<&mut EventsStream>,
        message: ReplicationMessage<LogicalReplicationMessage>,
    ) -> CdcResult<bool> {
        match message {
            ReplicationMessage::XLogData(message) => {
                let start_lsn = PgLsn::from(message.wal_start());
                self.state.update_last_received_lsn(start_lsn);

                let end_lsn = PgLsn::from(message.wal_end());
                self.state.update_last_received_lsn(end_lsn);

                let result = self.handle_logical_replication_message(start_lsn, message.into_data())?;

                if let Some(event) = result.event {
                    self.state.events_batch.push(event);
                }
                if let Some(end_lsn) = result.end_lsn {
                    let last = self.state.last_commit_end_lsn.get_or_insert(end_lsn);
                    if end_lsn > *last {
                        *last = end_lsn;
                    }
                }

                if self.state.events_batch.len() >= self.config.batch.max_size {
                    self.flush_batch().await?;
                }

                Ok(result.end_of_stream)
            }
            ReplicationMessage::PrimaryKeepAlive(message) => {
                let end_lsn = PgLsn::from(message.wal_end());
                self.state.update_last_received_lsn(end_lsn);

                debug!(
                    wal_end = %end_lsn,
                    reply_requested = message.reply() == 1,
                    "received keep alive",
                );

                events_stream
                    .send_status_update(
                        self.state.last_received_lsn,
                        self.state.effective_flush_lsn(),
                        self.state.effective_flush_lsn(),
                        message.reply() == 1,
                    )
                    .await?;

                // A keepalive's wal_end covers everything the server has sent
                // so far. Once it passes the bound outside a transaction,
                // nothing below the bound remains in flight.
                Ok(!self.state.handling_transaction() && end_lsn >= self.upto_lsn)
            }
            _ => Ok(false),
        }
    }

    /// Processes logical replication messages and converts them to typed
    /// events.
    fn handle_logical_replication_message(
        &mut self,
        start_lsn: PgLsn,
        message: LogicalReplicationMessage,
    ) -> CdcResult<HandleMessageResult> {
        match &message {
            LogicalReplicationMessage::Begin(begin_body) => {
                self.handle_begin_message(start_lsn, begin_body)
            }
            LogicalReplicationMessage::Commit(commit_body) => {
                self.handle_commit_message(start_lsn, commit_body)
            }
            LogicalReplicationMessage::Relation(relation_body) => {
                let commit_lsn = self.current_commit_lsn()?;
                let table_schema = build_table_schema_from_relation_message(relation_body)?;
                let event = self
                    .builder
                    .process_relation(start_lsn, commit_lsn, table_schema)?;

                Ok(HandleMessageResult::return_event(Event::Relation(event)))
            }
            LogicalReplicationMessage::Insert(insert_body) => {
                let commit_lsn = self.current_commit_lsn()?;
                let event = self.builder.process_insert(
                    start_lsn,
                    commit_lsn,
                    TableId::new(insert_body.rel_id()),
                    insert_body.tuple().tuple_data(),
                )?;

                Ok(match event {
                    Some(event) => HandleMessageResult::return_event(Event::Insert(event)),
                    None => HandleMessageResult::no_event(),
                })
            }
            LogicalReplicationMessage::Update(update_body) => {
                let commit_lsn = self.current_commit_lsn()?;
                let event = self.builder.process_update(
                    start_lsn,
                    commit_lsn,
                    TableId::new(update_body.rel_id()),
                    update_body.old_tuple().map(|tuple| tuple.tuple_data()),
                    update_body.key_tuple().map(|tuple| tuple.tuple_data()),
                    update_body.new_tuple().tuple_data(),
                )?;

                Ok(match event {
                    Some(event) => HandleMessageResult::return_event(Event::Update(event)),
                    None => HandleMessageResult::no_event(),
                })
            }
            LogicalReplicationMessage::Delete(delete_body) => {
                let commit_lsn = self.current_commit_lsn()?;
                let deleted_at = self.current_commit_timestamp()?;
                let event = self.builder.process_delete(
                    start_lsn,
                    commit_lsn,
                    TableId::new(delete_body.rel_id()),
                    delete_body.old_tuple().map(|tuple| tuple.tuple_data()),
                    delete_body.key_tuple().map(|tuple| tuple.tuple_data()),
                    deleted_at,
                )?;

                Ok(match event {
                    Some(event) => HandleMessageResult::return_event(Event::Delete(event)),
                    None => HandleMessageResult::no_event(),
                })
            }
            LogicalReplicationMessage::Truncate(truncate_body) => {
                let commit_lsn = self.current_commit_lsn()?;
                let event = self.builder.process_truncate(
                    start_lsn,
                    commit_lsn,
                    truncate_body.options(),
                    truncate_body.rel_ids(),
                );

                Ok(match event {
                    Some(event) => HandleMessageResult::return_event(Event::Truncate(event)),
                    None => HandleMessageResult::no_event(),
                })
            }
            LogicalReplicationMessage::Origin(_) => {
                debug!("received unsupported ORIGIN message");
                Ok(HandleMessageResult::no_event())
            }
            LogicalReplicationMessage::Type(_) => {
                debug!("received unsupported TYPE message");
                Ok(HandleMessageResult::no_event())
            }
            _ => Ok(HandleMessageResult::no_event()),
        }
    }

    /// Handles Postgres BEGIN messages.
    ///
    /// A transaction committing past the upper bound ends the pass before any
    /// of its messages are processed: transactions arrive in commit order, so
    /// everything after it commits later still.
    fn handle_begin_message(
        &mut self,
        start_lsn: PgLsn,
        message: &protocol::BeginBody,
    ) -> CdcResult<HandleMessageResult> {
        let final_lsn = PgLsn::from(message.final_lsn());
        if final_lsn > self.upto_lsn {
            debug!(
                commit_lsn = %final_lsn,
                "transaction commits past the upper bound, ending pass"
            );

            return Ok(HandleMessageResult {
                end_of_stream: true,
                ..Default::default()
            });
        }

        self.state.remote_final_lsn = Some(final_lsn);
        self.state.remote_commit_ts =
            DateTime::from_timestamp_micros(postgres_micros_to_unix_micros(message.timestamp()));

        let event = parse_event_from_begin_message(start_lsn, message);

        Ok(HandleMessageResult::return_event(Event::Begin(event)))
    }

    /// Handles Postgres COMMIT messages.
    fn handle_commit_message(
        &mut self,
        start_lsn: PgLsn,
        message: &protocol::CommitBody,
    ) -> CdcResult<HandleMessageResult> {
        let Some(remote_final_lsn) = self.state.remote_final_lsn.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Invalid transaction state",
                "Transaction must be active before processing COMMIT message"
            );
        };
        self.state.remote_commit_ts = None;

        let commit_lsn = PgLsn::from(message.commit_lsn());
        if commit_lsn != remote_final_lsn {
            bail!(
                ErrorKind::InvalidData,
                "Invalid commit LSN",
                format!(
                    "Incorrect commit LSN {} in COMMIT message (expected {})",
                    commit_lsn, remote_final_lsn
                )
            );
        }

        let end_lsn = PgLsn::from(message.end_lsn());
        let event = parse_event_from_commit_message(start_lsn, message);

        Ok(HandleMessageResult {
            event: Some(Event::Commit(event)),
            end_lsn: Some(end_lsn),
            end_of_stream: end_lsn >= self.upto_lsn,
        })
    }

    /// Returns the commit LSN of the transaction currently being processed.
    ///
    /// Data messages outside a transaction violate the stream's framing.
    fn current_commit_lsn(&self) -> CdcResult<PgLsn> {
        self.state.remote_final_lsn.ok_or_else(|| {
            cdc_error!(
                ErrorKind::InvalidState,
                "Invalid transaction state",
                "A data message arrived outside of a BEGIN/COMMIT pair"
            )
        })
    }

    /// Returns the commit timestamp of the transaction currently being
    /// processed, used to stamp soft-delete markers.
    fn current_commit_timestamp(&self) -> CdcResult<DateTime<Utc>> {
        self.state.remote_commit_ts.ok_or_else(|| {
            cdc_error!(
                ErrorKind::InvalidState,
                "Invalid transaction state",
                "A data message arrived outside of a BEGIN/COMMIT pair"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cdc_postgres::types::{ColumnSchema, TableName};
    use tokio_postgres::types::Type;

    use crate::conversions::numeric::PgNumeric;
    use crate::destination::MemoryDestination;
    use crate::policy::WriteDisposition;
    use crate::types::EventType;

    const INVOICE_TABLE_ID: u32 = 16385;

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

    fn builder_with_invoice() -> EventBuilder {
        let mut builder = EventBuilder::new(PublicationOperations::default());
        builder
            .process_relation(PgLsn::from(10), PgLsn::from(100), invoice_schema())
            .unwrap();

        builder
    }

    fn text(value: &str) -> protocol::TupleData {
        protocol::TupleData::Text(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn commit_ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn relation_then_insert_yields_typed_event() {
        let mut builder = builder_with_invoice();

        let event = builder
            .process_insert(
                PgLsn::from(11),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                &[text("1"), text("19.99")],
            )
            .unwrap()
            .expect("insert is enabled");

        assert_eq!(event.table_id, TableId::new(INVOICE_TABLE_ID));
        assert_eq!(event.table_row.values[0], Cell::I32(1));
        assert_eq!(
            event.table_row.values[1],
            Cell::Numeric("19.99".parse::<PgNumeric>().unwrap())
        );
    }

    #[test]
    fn insert_before_relation_is_unknown_relation() {
        let mut builder = EventBuilder::new(PublicationOperations::default());

        let err = builder
            .process_insert(
                PgLsn::from(11),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                &[text("1"), text("19.99")],
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownRelation);
    }

    #[test]
    fn delete_before_relation_is_unknown_relation() {
        let mut builder = EventBuilder::new(PublicationOperations::default());

        let err = builder
            .process_delete(
                PgLsn::from(11),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                None,
                Some(&[text("1"), protocol::TupleData::Null]),
                commit_ts(),
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownRelation);
    }

    #[test]
    fn delete_is_rendered_as_soft_delete_append() {
        let mut builder = builder_with_invoice();

        let event = builder
            .process_delete(
                PgLsn::from(12),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                None,
                Some(&[text("1"), protocol::TupleData::Null]),
                commit_ts(),
            )
            .unwrap()
            .expect("delete is enabled");

        // The identity image is preserved and marked as key-only.
        let (is_key, old_row) = event.old_table_row.as_ref().unwrap();
        assert!(*is_key);
        assert_eq!(old_row.values[0], Cell::I32(1));

        // The soft-delete rendering keeps the key and stamps the marker.
        assert_eq!(event.soft_delete_row.values.len(), 3);
        assert_eq!(event.soft_delete_row.values[0], Cell::I32(1));
        assert_eq!(event.soft_delete_row.values[2], Cell::TimestampTz(commit_ts()));

        // The hints never ask for destructive writes.
        let entry = builder
            .catalog
            .entry(&TableId::new(INVOICE_TABLE_ID))
            .unwrap();
        assert_eq!(entry.hints.write_disposition, WriteDisposition::Append);
        assert!(!entry.hints.hard_delete);
    }

    #[test]
    fn update_without_before_image_has_empty_before() {
        let mut builder = builder_with_invoice();

        let event = builder
            .process_update(
                PgLsn::from(13),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                None,
                None,
                &[text("1"), text("29.99")],
            )
            .unwrap()
            .expect("update is enabled");

        assert!(event.old_table_row.is_none());
        assert_eq!(event.table_row.values[0], Cell::I32(1));
        assert_eq!(
            event.table_row.values[1],
            Cell::Numeric("29.99".parse::<PgNumeric>().unwrap())
        );
    }

    #[test]
    fn update_with_key_tuple_marks_before_as_key_only() {
        let mut builder = builder_with_invoice();

        let event = builder
            .process_update(
                PgLsn::from(13),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                None,
                Some(&[text("1"), protocol::TupleData::Null]),
                &[text("2"), text("29.99")],
            )
            .unwrap()
            .unwrap();

        let (is_key, old_row) = event.old_table_row.unwrap();
        assert!(is_key);
        assert_eq!(old_row.values[0], Cell::I32(1));
    }

    #[test]
    fn disabled_operation_is_skipped_without_events() {
        let operations = PublicationOperations {
            insert: false,
            update: true,
            delete: true,
            truncate: false,
        };
        let mut builder = EventBuilder::new(operations);
        builder
            .process_relation(PgLsn::from(10), PgLsn::from(100), invoice_schema())
            .unwrap();

        let event = builder
            .process_insert(
                PgLsn::from(11),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                &[text("1"), text("19.99")],
            )
            .unwrap();

        assert!(event.is_none());
    }

    #[test]
    fn truncate_is_gated_by_publication_operations() {
        let mut builder = builder_with_invoice();

        // Truncate is disabled by default: zero events.
        let skipped = builder.process_truncate(
            PgLsn::from(14),
            PgLsn::from(100),
            0,
            &[INVOICE_TABLE_ID],
        );
        assert!(skipped.is_none());

        let operations = PublicationOperations {
            truncate: true,
            ..PublicationOperations::default()
        };
        let mut builder = EventBuilder::new(operations);
        let event = builder
            .process_truncate(PgLsn::from(14), PgLsn::from(100), 0, &[INVOICE_TABLE_ID])
            .expect("truncate is enabled");

        assert_eq!(event.table_ids, vec![TableId::new(INVOICE_TABLE_ID)]);
    }

    #[test]
    fn relation_replacement_is_visible_to_subsequent_decodes() {
        let mut builder = builder_with_invoice();

        // The same relation is announced again with a changed column type.
        let changed = TableSchema::new(
            TableId::new(INVOICE_TABLE_ID),
            TableName::new("public".to_string(), "invoice".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT8, -1, true),
                ColumnSchema::new("total".to_string(), Type::TEXT, -1, false),
            ],
        );
        builder
            .process_relation(PgLsn::from(20), PgLsn::from(200), changed)
            .unwrap();

        let event = builder
            .process_insert(
                PgLsn::from(21),
                PgLsn::from(200),
                TableId::new(INVOICE_TABLE_ID),
                &[text("1"), text("19.99")],
            )
            .unwrap()
            .unwrap();

        assert_eq!(event.table_row.values[0], Cell::I64(1));
        assert_eq!(
            event.table_row.values[1],
            Cell::String("19.99".to_string())
        );
    }

    #[tokio::test]
    async fn destination_retains_both_row_versions() {
        let mut builder = builder_with_invoice();
        let destination = MemoryDestination::new();

        let insert = builder
            .process_insert(
                PgLsn::from(11),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                &[text("1"), text("19.99")],
            )
            .unwrap()
            .unwrap();
        let delete = builder
            .process_delete(
                PgLsn::from(12),
                PgLsn::from(100),
                TableId::new(INVOICE_TABLE_ID),
                None,
                Some(&[text("1"), protocol::TupleData::Null]),
                commit_ts(),
            )
            .unwrap()
            .unwrap();

        destination
            .write_events(vec![Event::Insert(insert), Event::Delete(delete)])
            .await
            .unwrap();

        // Both versions of row id=1 survive at the destination: the insert
        // and the soft-deleted re-append.
        let events = destination.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::Insert);
        assert_eq!(events[1].event_type(), EventType::Delete);

        let Event::Delete(delete) = &events[1] else {
            unreachable!();
        };
        assert!(!delete.soft_delete_row.values[2].is_null());
    }
}

