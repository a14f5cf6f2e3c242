use cdc_config::shared::PgConnectionConfig;
use pg_escape::{quote_identifier, quote_literal};
use postgres_replication::LogicalReplicationStream;
use rustls::ClientConfig;
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;

use tokio_postgres::error::SqlState;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{
    Client, Config, Connection, NoTls, SimpleQueryMessage, SimpleQueryRow, Socket,
    config::ReplicationMode, types::PgLsn,
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, error, info, warn};

use crate::error::{CdcResult, ErrorKind};
use crate::{bail, cdc_error};

/// Spawns a background task to monitor a Postgres connection until it
/// terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        let result = connection.await;

        match result {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => info!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    // There is no need to track the connection task via the `JoinHandle` since
    // the `Client`, which returned the connection, will automatically terminate
    // the connection when dropped.
    tokio::spawn(task);
}

/// Result returned when creating a new replication slot.
///
/// Contains the consistent point LSN that should be used as the starting
/// point for logical replication.
#[derive(Debug, Clone)]
pub struct CreateSlotResult {
    /// The LSN at which the slot was created, representing a consistent point
    /// in the WAL.
    pub consistent_point: PgLsn,
}

/// Result returned when retrieving an existing replication slot.
///
/// Contains the confirmed flush LSN indicating how far replication has
/// progressed.
#[derive(Debug, Clone)]
pub struct GetSlotResult {
    /// The LSN up to which changes have been confirmed as processed.
    pub confirmed_flush_lsn: PgLsn,
}

/// Result type for operations that either get an existing slot or create a
/// new one.
///
/// This enum distinguishes between whether a slot was newly created or
/// already existed, providing appropriate result data for each case.
#[derive(Debug, Clone)]
pub enum GetOrCreateSlotResult {
    /// A new slot was created with the given consistent point.
    CreateSlot(CreateSlotResult),
    /// An existing slot was found with the given confirmed flush LSN.
    GetSlot(GetSlotResult),
}

impl GetOrCreateSlotResult {
    /// Returns the lsn that should be used as starting LSN during events
    /// replication.
    pub fn get_start_lsn(&self) -> PgLsn {
        match self {
            GetOrCreateSlotResult::CreateSlot(result) => result.consistent_point,
            GetOrCreateSlotResult::GetSlot(result) => result.confirmed_flush_lsn,
        }
    }
}

/// The operation kinds a publication forwards to its consumers.
///
/// Loaded once at session start and used by the consume loop to validate the
/// stream: a message for a disabled operation kind is a protocol violation,
/// not a decodable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationOperations {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
    pub truncate: bool,
}

impl Default for PublicationOperations {
    /// The operation set `CREATE PUBLICATION` enables when no `publish`
    /// parameter is given, except truncate which this pipeline does not
    /// forward by default.
    fn default() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
            truncate: false,
        }
    }
}

/// A client for interacting with Postgres's logical replication features.
///
/// This client provides methods for creating replication slots, managing
/// publications, and streaming changes from the database.
#[derive(Debug, Clone)]
pub struct PgReplicationClient {
    client: Arc<Client>,
}

impl PgReplicationClient {
    /// Establishes a connection to Postgres. The connection uses TLS if
    /// configured in the supplied [`PgConnectionConfig`].
    ///
    /// The connection is configured for logical replication mode.
    pub async fn connect(pg_connection_config: PgConnectionConfig) -> CdcResult<Self> {
        match pg_connection_config.tls.enabled {
            true => PgReplicationClient::connect_tls(pg_connection_config).await,
            false => PgReplicationClient::connect_no_tls(pg_connection_config).await,
        }
    }

    /// Establishes a connection to Postgres without TLS encryption.
    async fn connect_no_tls(pg_connection_config: PgConnectionConfig) -> CdcResult<Self> {
        let mut config: Config = pg_connection_config.with_db();
        config.replication_mode(ReplicationMode::Logical);

        let (client, connection) = config.connect(NoTls).await?;

        spawn_postgres_connection::<NoTls>(connection);

        info!("successfully connected to postgres without tls");

        Ok(PgReplicationClient {
            client: Arc::new(client),
        })
    }

    /// Establishes a TLS-encrypted connection to Postgres.
    async fn connect_tls(pg_connection_config: PgConnectionConfig) -> CdcResult<Self> {
        let mut config: Config = pg_connection_config.with_db();
        config.replication_mode(ReplicationMode::Logical);

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader =
            BufReader::new(pg_connection_config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert?;
            root_store.add(cert)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;

        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        info!("successfully connected to postgres with tls");

        Ok(PgReplicationClient {
            client: Arc::new(client),
        })
    }

    /// Checks if the underlying connection is closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Gets the slot by `slot_name`.
    ///
    /// Returns an error in case of failure or missing slot.
    pub async fn get_slot(&self, slot_name: &str) -> CdcResult<GetSlotResult> {
        let query = format!(
            r#"select confirmed_flush_lsn from pg_replication_slots where slot_name = {};"#,
            quote_literal(slot_name)
        );

        let results = self.client.simple_query(&query).await?;
        for result in results {
            if let SimpleQueryMessage::Row(row) = result {
                let confirmed_flush_lsn =
                    Self::get_row_value::<PgLsn>(&row, "confirmed_flush_lsn", "pg_replication_slots")?;
                let slot = GetSlotResult {
                    confirmed_flush_lsn,
                };

                return Ok(slot);
            }
        }

        bail!(
            ErrorKind::ReplicationSlotNotFound,
            "Replication slot not found",
            format!("Replication slot '{}' not found in database", slot_name)
        );
    }

    /// Creates a new logical replication slot bound to the pgoutput plugin.
    pub async fn create_slot(&self, slot_name: &str) -> CdcResult<CreateSlotResult> {
        // Do not convert the query or the options to lowercase, since the
        // lexer for replication commands (repl_scanner.l) in Postgres code
        // expects the commands in uppercase.
        let query = format!(
            r#"CREATE_REPLICATION_SLOT {} LOGICAL pgoutput NOEXPORT_SNAPSHOT"#,
            quote_identifier(slot_name)
        );
        match self.client.simple_query(&query).await {
            Ok(results) => {
                for result in results {
                    if let SimpleQueryMessage::Row(row) = result {
                        let consistent_point = Self::get_row_value::<PgLsn>(
                            &row,
                            "consistent_point",
                            "pg_replication_slots",
                        )?;
                        let slot = CreateSlotResult { consistent_point };

                        return Ok(slot);
                    }
                }
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::DUPLICATE_OBJECT
                {
                    bail!(
                        ErrorKind::ReplicationSlotAlreadyExists,
                        "Replication slot already exists",
                        format!(
                            "Replication slot '{}' already exists in database",
                            slot_name
                        )
                    );
                }

                return Err(err.into());
            }
        }

        Err(cdc_error!(
            ErrorKind::ReplicationSlotNotCreated,
            "Replication slot creation failed"
        ))
    }

    /// Gets an existing replication slot or creates a new one if it doesn't
    /// exist.
    ///
    /// This method first attempts to get the slot by name. If the slot
    /// doesn't exist, it creates a new one. Safe to call on every capture
    /// pass.
    pub async fn get_or_create_slot(&self, slot_name: &str) -> CdcResult<GetOrCreateSlotResult> {
        match self.get_slot(slot_name).await {
            Ok(slot) => {
                info!("using existing replication slot '{}'", slot_name);

                Ok(GetOrCreateSlotResult::GetSlot(slot))
            }
            Err(err) if err.kind() == ErrorKind::ReplicationSlotNotFound => {
                info!("creating new replication slot '{}'", slot_name);

                let create_result = self.create_slot(slot_name).await?;

                Ok(GetOrCreateSlotResult::CreateSlot(create_result))
            }
            Err(e) => Err(e),
        }
    }

    /// Checks if a publication with the given name exists.
    pub async fn publication_exists(&self, publication: &str) -> CdcResult<bool> {
        let publication_exists_query = format!(
            "select 1 as exists from pg_publication where pubname = {};",
            quote_literal(publication)
        );
        for msg in self.client.simple_query(&publication_exists_query).await? {
            if let SimpleQueryMessage::Row(_) = msg {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Creates a publication scoped to the given tables within a schema.
    ///
    /// A concurrently created publication with the same name is treated as
    /// success: setup is idempotent across capture passes.
    pub async fn create_publication(
        &self,
        publication: &str,
        schema: &str,
        table_names: &[String],
    ) -> CdcResult<()> {
        let table_list = table_names
            .iter()
            .map(|table_name| {
                format!(
                    "{}.{}",
                    quote_identifier(schema),
                    quote_identifier(table_name)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "create publication {} for table {};",
            quote_identifier(publication),
            table_list
        );

        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!("created publication '{}'", publication);

                Ok(())
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::DUPLICATE_OBJECT
                {
                    warn!(
                        "publication '{}' was created concurrently, continuing",
                        publication
                    );

                    return Ok(());
                }

                Err(err.into())
            }
        }
    }

    /// Reads which operation kinds a publication forwards.
    pub async fn get_publication_operations(
        &self,
        publication: &str,
    ) -> CdcResult<PublicationOperations> {
        let query = format!(
            "select pubinsert, pubupdate, pubdelete, pubtruncate from pg_publication \
             where pubname = {};",
            quote_literal(publication)
        );

        for msg in self.client.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = msg {
                return Ok(PublicationOperations {
                    insert: Self::get_row_flag(&row, "pubinsert")?,
                    update: Self::get_row_flag(&row, "pubupdate")?,
                    delete: Self::get_row_flag(&row, "pubdelete")?,
                    truncate: Self::get_row_flag(&row, "pubtruncate")?,
                });
            }
        }

        bail!(
            ErrorKind::ConfigError,
            "Publication not found",
            format!("Publication '{}' not found in database", publication)
        );
    }

    /// Returns the server's current WAL write position.
    ///
    /// Resolved once at session start to bound the capture pass.
    pub async fn current_wal_lsn(&self) -> CdcResult<PgLsn> {
        for msg in self.client.simple_query("IDENTIFY_SYSTEM").await? {
            if let SimpleQueryMessage::Row(row) = msg {
                return Self::get_row_value::<PgLsn>(&row, "xlogpos", "identify_system");
            }
        }

        bail!(
            ErrorKind::SourceQueryFailed,
            "IDENTIFY_SYSTEM returned no rows"
        );
    }

    /// Starts a logical replication stream from the specified publication and
    /// slot.
    ///
    /// The stream will begin reading changes from the provided `start_lsn`.
    pub async fn start_logical_replication(
        &self,
        publication_name: &str,
        slot_name: &str,
        start_lsn: PgLsn,
    ) -> CdcResult<LogicalReplicationStream> {
        info!(
            "starting logical replication from publication '{}' with slot named '{}' at lsn {}",
            publication_name, slot_name, start_lsn
        );

        // Do not convert the query or the options to lowercase, see comment
        // in `create_slot`.
        let options = format!(
            r#"("proto_version" '1', "publication_names" {})"#,
            quote_literal(quote_identifier(publication_name).as_ref())
        );

        let query = format!(
            r#"START_REPLICATION SLOT {} LOGICAL {} {}"#,
            quote_identifier(slot_name),
            start_lsn,
            options
        );

        let copy_stream = self.client.copy_both_simple::<bytes::Bytes>(&query).await?;
        let stream = LogicalReplicationStream::new(copy_stream);

        Ok(stream)
    }

    /// Helper function to extract a boolean flag from a
    /// [`SimpleQueryMessage::Row`].
    fn get_row_flag(row: &SimpleQueryRow, column_name: &str) -> CdcResult<bool> {
        let value = Self::get_row_value::<String>(row, column_name, "pg_publication")?;
        Ok(value == "t" || value == "true")
    }

    /// Helper function to extract a value from a [`SimpleQueryMessage::Row`].
    ///
    /// Returns an error if the column is not found or if the value cannot be
    /// parsed to the target type.
    fn get_row_value<T: std::str::FromStr>(
        row: &SimpleQueryRow,
        column_name: &str,
        table_name: &str,
    ) -> CdcResult<T>
    where
        T::Err: fmt::Debug,
    {
        let value = row.try_get(column_name)?.ok_or(cdc_error!(
            ErrorKind::SourceQueryFailed,
            "Column not found in source table",
            format!(
                "Column '{}' not found in table '{}'",
                column_name, table_name
            )
        ))?;

        value.parse().map_err(|e: T::Err| {
            cdc_error!(
                ErrorKind::ConversionError,
                "Column parsing failed",
                format!(
                    "Failed to parse value from column '{}' in table '{}': {:?}",
                    column_name, table_name, e
                )
            )
        })
    }
}
