//! Error types for the engine.

use thiserror::Error;

use lodestone_core::{BlockError, HashDigest, TxError};
use lodestone_store::StoreError;

/// Engine error type.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A block failed validation; the chain is unchanged.
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    /// A transaction failed validation; the chain is unchanged.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxError),

    /// A block's delta snapshot is missing. Recoverable by retrying with
    /// `complete = true`.
    #[error("block states missing for block {0}")]
    IncompleteBlockStates(HashDigest),

    /// A block referenced by this operation is not in the store.
    #[error("unknown block: {0}")]
    UnknownBlock(HashDigest),

    /// Storage failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The operation observed its cancellation token.
    #[error("operation was canceled")]
    Canceled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ChainError>;
