//! Error types for the storage backends.

use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by local caches and durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable store could not be reached (timeout, connect error, 5xx).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The durable store answered but refused the request.
    #[error("store rejected request: {0}")]
    Rejected(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An I/O operation on the on-device cache failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Context describing the operation.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Errors coming from the in-process lock around a store.
    #[error("storage lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

pub(crate) fn io_error<S: Into<String>>(context: S, source: std::io::Error) -> StoreError {
    StoreError::Io {
        context: context.into(),
        source,
    }
}

pub(crate) fn poisoned() -> StoreError {
    StoreError::Lock("mutex poisoned".to_string())
}
