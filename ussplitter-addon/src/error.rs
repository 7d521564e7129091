//! Client-side error type

use std::time::Duration;
use thiserror::Error;

/// Errors raised while driving a song through the server
#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing or malformed addon configuration; raised before any network call
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure (connection refused, reset, timeout on a request)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status not covered below
    #[error("Server error {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job not ready: {0}")]
    NotReady(String),

    /// Server queue is full; retry later
    #[error("Server busy: {0}")]
    ResourceExhausted(String),

    /// Separation failed on the server; carries its diagnostic
    #[error("Separation failed: {0}")]
    JobFailed(String),

    /// Gave up waiting for the job
    #[error("Timed out after {}s waiting for the server", .0.as_secs())]
    Timeout(Duration),

    /// Response that does not follow the API
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Failures worth retrying: the request never got a proper answer
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Http(_))
    }
}

impl From<ussplitter_common::Error> for ClientError {
    fn from(err: ussplitter_common::Error) -> Self {
        match err {
            ussplitter_common::Error::Io(e) => ClientError::Io(e),
            ussplitter_common::Error::Config(msg) => ClientError::Config(msg),
            ussplitter_common::Error::InvalidInput(msg) => ClientError::Config(msg),
            ussplitter_common::Error::Protocol(msg) => ClientError::Protocol(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
