//! Error types for the store module.

use thiserror::Error;

use lodestone_core::{ChainId, HashDigest};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The same hash was appended twice at the tip of a chain index.
    #[error("hash {hash} already at the tip of chain {chain}")]
    DuplicateAppend { chain: ChainId, hash: HashDigest },

    /// A background storage task failed to complete.
    #[error("storage task failed: {0}")]
    Background(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lodestone_core::ValueError> for StoreError {
    fn from(e: lodestone_core::ValueError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

impl From<lodestone_core::BlockError> for StoreError {
    fn from(e: lodestone_core::BlockError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

impl From<lodestone_core::TxError> for StoreError {
    fn from(e: lodestone_core::TxError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
