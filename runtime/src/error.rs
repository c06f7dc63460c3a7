//! Error types for requests, transports and task bookkeeping.

use std::sync::Arc;
use thiserror::Error;

/// Failures reported by the transport through the terminal completion
/// callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transfer was cancelled. Downloads may hand back data that lets a
    /// later request resume where this one stopped.
    #[error("Transfer cancelled")]
    Cancelled {
        /// Opaque resume token produced by the transport, if any
        resume_data: Option<Vec<u8>>,
    },

    /// The transfer exceeded its timeout
    #[error("Transfer timed out")]
    TimedOut,

    /// No connection to the remote host could be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other transport failure
    #[error("Transport failure: {0}")]
    Other(String),
}

/// The failure type of every response future.
///
/// `HttpError` is `Clone` because a completed future hands the same failure
/// to each of its observers; foreign sources are kept behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    /// The request URL is malformed or lacks a scheme or host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A header name or value could not be built
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// An upload task was started for a request without a body
    #[error("Upload request has no body")]
    MissingUploadBody,

    /// Encoding or decoding a JSON body failed
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// The transport reported a failure
    #[error("Session error: {0}")]
    Session(#[from] TransportError),

    /// The task was cancelled by its owner
    #[error("Task cancelled")]
    Cancelled,

    /// The response could not be interpreted
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// Persisting or reading a file failed
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal bookkeeping reached a state that should be impossible
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// A failure produced by user-supplied middleware
    #[error(transparent)]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl HttpError {
    /// Wrap an arbitrary error as a [`HttpError::Custom`] failure.
    pub fn custom(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(error))
    }

    /// Whether this failure stems from cancellation, by the owner or by the
    /// transport.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Session(TransportError::Cancelled { .. })
        )
    }

    /// Resume data carried by a cancelled transfer.
    #[must_use]
    pub fn resume_data(&self) -> Option<&[u8]> {
        match self {
            Self::Session(TransportError::Cancelled {
                resume_data: Some(data),
            }) => Some(data),
            _ => None,
        }
    }

    /// Whether this failure is a bookkeeping bug rather than a network
    /// problem.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolated(_))
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(Arc::new(error))
    }
}

impl From<std::io::Error> for HttpError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<http::Error> for HttpError {
    fn from(error: http::Error) -> Self {
        Self::InvalidUrl(error.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for HttpError {
    fn from(error: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(error.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for HttpError {
    fn from(error: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(error.to_string())
    }
}
