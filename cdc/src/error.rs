//! Error types and result definitions for CDC capture operations.
//!
//! Provides a structured error system with classification and captured
//! diagnostic metadata. The [`CdcError`] type carries an [`ErrorKind`] so
//! callers can pattern-match on severity and failure category instead of
//! matching on type identity.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for CDC operations using [`CdcError`] as the error
/// type.
pub type CdcResult<T> = Result<T, CdcError>;

/// Detailed payload stored for [`CdcError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for CDC capture operations.
///
/// Every fatal condition in the capture core surfaces as a [`CdcError`];
/// non-fatal conditions (decode fallbacks, protocol violations) are logged at
/// the site where they occur and never become error values, per the capture
/// error taxonomy.
#[derive(Debug, Clone)]
pub struct CdcError {
    payload: ErrorPayload,
}

/// Specific categories of errors that can occur during a capture pass.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Session setup errors
    InitializationFailed,
    ConfigError,

    // Connection errors
    SourceConnectionFailed,

    // Query & execution errors
    SourceQueryFailed,

    // Stream consistency errors
    UnknownRelation,
    InvalidState,

    // Data & transformation errors
    ConversionError,
    InvalidData,

    // Replication slot errors
    ReplicationSlotNotFound,
    ReplicationSlotAlreadyExists,
    ReplicationSlotNotCreated,

    // IO errors
    IoError,

    // Unknown / uncategorized
    Unknown,
}

impl CdcError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance.
    ///
    /// The stored source is preserved across clones and exposed via
    /// [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`CdcError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        CdcError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            },
        }
    }
}

impl PartialEq for CdcError {
    fn eq(&self, other: &CdcError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let location = self.payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.payload.kind,
            self.payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = self.payload.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for CdcError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`CdcError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for CdcError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> CdcError {
        CdcError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`CdcError`] from an error kind, static description, and dynamic
/// detail.
impl<D> From<(ErrorKind, &'static str, D)> for CdcError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> CdcError {
        CdcError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`CdcError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for CdcError {
    #[track_caller]
    fn from(err: std::io::Error) -> CdcError {
        let detail = err.to_string();
        let source = Arc::new(err);
        CdcError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`std::str::Utf8Error`] to [`CdcError`] with
/// [`ErrorKind::ConversionError`].
impl From<std::str::Utf8Error> for CdcError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> CdcError {
        let detail = err.to_string();
        let source = Arc::new(err);
        CdcError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 conversion failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`tokio_postgres::Error`] to [`CdcError`] with the appropriate
/// error kind.
///
/// Errors that carry a SQLSTATE come from the server and are classified as
/// query failures; errors without one are connection-level failures (closed
/// socket, timeout, TLS) and map to [`ErrorKind::SourceConnectionFailed`].
impl From<tokio_postgres::Error> for CdcError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> CdcError {
        let (kind, description) = match err.code() {
            Some(_) => (ErrorKind::SourceQueryFailed, "Postgres query failed"),
            None => (
                ErrorKind::SourceConnectionFailed,
                "Postgres connection failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        CdcError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`rustls::Error`] to [`CdcError`] with
/// [`ErrorKind::SourceConnectionFailed`].
impl From<rustls::Error> for CdcError {
    #[track_caller]
    fn from(err: rustls::Error) -> CdcError {
        let detail = err.to_string();
        let source = Arc::new(err);
        CdcError::from_components(
            ErrorKind::SourceConnectionFailed,
            Cow::Borrowed("TLS setup failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, cdc_error};

    fn failing_operation() -> CdcResult<()> {
        bail!(
            ErrorKind::UnknownRelation,
            "Relation not announced",
            "relation 42 was never announced by the stream"
        );
    }

    #[test]
    fn test_error_kind_and_detail() {
        let err = failing_operation().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRelation);
        assert_eq!(
            err.detail(),
            Some("relation 42 was never announced by the stream")
        );
    }

    #[test]
    fn test_errors_compare_by_kind() {
        let a = cdc_error!(ErrorKind::ConfigError, "Bad config", "first");
        let b = cdc_error!(ErrorKind::ConfigError, "Bad config", "second");
        let c = cdc_error!(ErrorKind::InvalidData, "Bad data");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_source_is_preserved() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = cdc_error!(
            ErrorKind::SourceConnectionFailed,
            "Connection lost",
            source: io_err
        );

        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display_contains_kind_and_location() {
        let err = cdc_error!(ErrorKind::InvalidState, "Commit without begin");
        let rendered = err.to_string();

        assert!(rendered.contains("InvalidState"));
        assert!(rendered.contains("error.rs"));
    }
}
