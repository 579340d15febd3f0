//! Error types for key-value engine operations.

use thiserror::Error;

/// Result type for key-value engine operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur in a key-value engine.
#[derive(Debug, Error)]
pub enum KvError {
    /// A writing transaction is already active.
    #[error("another writing transaction is active")]
    WriterActive,

    /// A mutation was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// The engine state is corrupted.
    #[error("engine corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },
}

impl KvError {
    /// Creates a corrupted-engine error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
