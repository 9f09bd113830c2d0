//! Error types for the sync engine.

use librarium_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network-level failure (DNS, connect, mid-request drop).
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The server answered with an error status.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// The response did not match the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The device is offline.
    #[error("device is offline")]
    Offline,

    /// Local storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The pull was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A pull is already running.
    #[error("a sync is already in progress")]
    AlreadyRunning,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a server error from a status code and message.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Server 4xx responses are not retryable: the request itself is
    /// wrong and repeating it cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Server { status, .. } => *status >= 500,
            SyncError::Timeout => true,
            SyncError::Offline => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network_retryable("connection reset").is_retryable());
        assert!(!SyncError::network_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::server(503, "unavailable").is_retryable());
        assert!(!SyncError::server(404, "gone").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::AlreadyRunning.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::server(500, "boom");
        assert_eq!(err.to_string(), "server error (500): boom");

        let err = SyncError::Offline;
        assert_eq!(err.to_string(), "device is offline");
    }

    #[test]
    fn store_error_converts() {
        let err: SyncError = StoreError::backend("disk full").into();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(!err.is_retryable());
    }
}
