//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying storage backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A row expected to exist was not found.
    #[error("row not found: {id}")]
    NotFound {
        /// Identifier of the missing row.
        id: String,
    },

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates a backend error from any displayable source.
    pub fn backend(source: impl std::fmt::Display) -> Self {
        Self::Backend(source.to_string())
    }

    /// Creates a not-found error for the given row ID.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}
