//! Error handling for auraplay.
//!
//! Provides a unified error type that pairs a failure category with the
//! underlying error, plus conversions from the errors of the crates used
//! throughout the library.
//!
//! # Error Categories
//!
//! * Playback: [`ErrorKind::NoStreamAvailable`]
//! * Remote writes: [`ErrorKind::RemoteSyncFailure`]
//! * Remote reads: [`ErrorKind::FetchTimeout`], [`ErrorKind::FetchError`]
//! * Local storage: [`ErrorKind::PersistenceFailure`]
//! * Caller mistakes and internal faults: everything else
//!
//! None of these are fatal. Reads degrade to "no data", writes degrade to
//! "keep local state", and persistence failures are logged and dropped by the
//! callers that own them.
//!
//! # Example
//!
//! ```rust
//! use auraplay::error::{Error, ErrorKind, Result};
//!
//! fn resolve(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(Error::no_stream_available("track 42 has no source"));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether this error means "the remote side had nothing for us", as
    /// opposed to a local fault.
    #[must_use]
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::FetchTimeout | ErrorKind::FetchError)
    }
}

/// Standard result type for auraplay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Neither a downloaded file nor a remote stream could be resolved.
    /// Playback does not start and the session is left untouched.
    #[error("no stream available")]
    NoStreamAvailable,

    /// A write to the catalog service failed. The optimistic local change
    /// has been reverted.
    #[error("remote sync failed")]
    RemoteSyncFailure,

    /// A read from the catalog or a lookup service did not complete in time.
    #[error("fetch timed out")]
    FetchTimeout,

    /// A read from the catalog or a lookup service failed.
    #[error("fetch failed")]
    FetchError,

    /// The key-value store could not be read or written.
    #[error("persistence failed")]
    PersistenceFailure,

    #[error("invalid argument specified")]
    InvalidArgument,

    #[error("not found")]
    NotFound,

    /// The session controller is gone or the request was abandoned.
    #[error("operation was cancelled")]
    Cancelled,

    #[error("internal error")]
    Internal,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for a track that has no playable source.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::no_stream_available("no download and no stream for 42");
    /// assert_eq!(err.kind, ErrorKind::NoStreamAvailable);
    /// ```
    pub fn no_stream_available<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoStreamAvailable, error)
    }

    /// Creates an error for a catalog write that did not take effect.
    pub fn remote_sync_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::RemoteSyncFailure, error)
    }

    /// Creates an error for a read that exceeded its time box.
    pub fn fetch_timeout<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FetchTimeout, error)
    }

    /// Creates an error for a read that failed for any other reason:
    /// network, non-2xx status or an unparseable body.
    pub fn fetch_error<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FetchError, error)
    }

    /// Creates an error for a failed store read or write.
    pub fn persistence_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PersistenceFailure, error)
    }

    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::{NotFound, TimedOut};
        match err.kind() {
            NotFound => Self::not_found(err),
            TimedOut => Self::fetch_timeout(err),
            _ => Self::persistence_failure(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::fetch_timeout(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        Self::fetch_error(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::fetch_timeout(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<regex_lite::Error> for Error {
    fn from(e: regex_lite::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}
