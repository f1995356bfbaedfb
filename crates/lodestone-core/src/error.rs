//! Error types for Lodestone core primitives.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Address, HashDigest};

/// Errors from canonical encoding and decoding.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected byte 0x{0:02x}")]
    UnexpectedByte(u8),

    #[error("invalid integer literal: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in text value")]
    InvalidUtf8,

    #[error("dictionary key must be a byte string or text")]
    InvalidDictKey,

    #[error("dictionary keys not in canonical order")]
    UnsortedDictKeys,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("missing dictionary key: {0}")]
    MissingKey(String),

    #[error("wrong type for {field}: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Errors from key handling and signature verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secp256k1 public key")]
    InvalidPublicKey,

    #[error("invalid secp256k1 private key")]
    InvalidPrivateKey,

    #[error("invalid signature encoding")]
    MalformedSignature,

    #[error("signature verification failed")]
    InvalidSignature,
}

/// Why a block failed validation or mining.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block hash does not match its contents")]
    InvalidHash,

    #[error("pre-evaluation hash does not match the block contents")]
    InvalidPreEvaluationHash,

    #[error("block hash does not satisfy difficulty {difficulty}")]
    InvalidDifficulty { difficulty: u64 },

    #[error("proof-of-work nonce does not satisfy difficulty")]
    InvalidNonce,

    #[error("invalid block index: expected {expected}, got {actual}")]
    InvalidIndex { expected: u64, actual: u64 },

    #[error("invalid previous hash: expected {expected:?}, got {actual:?}")]
    InvalidPreviousHash {
        expected: Option<HashDigest>,
        actual: Option<HashDigest>,
    },

    #[error("block timestamp {timestamp} outside the allowed window (limit {limit})")]
    InvalidTimestamp {
        timestamp: DateTime<Utc>,
        limit: DateTime<Utc>,
    },

    #[error("mining was canceled")]
    MiningCanceled,

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Decoding(#[from] ValueError),
}

/// Why a transaction failed validation.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("transaction signature does not verify")]
    InvalidSignature,

    #[error("signer {signer} does not match the public key's address {derived}")]
    SignerMismatch { signer: Address, derived: Address },

    #[error("invalid transaction nonce for {signer}: expected {expected}, got {actual}")]
    InvalidTxNonce {
        signer: Address,
        expected: i64,
        actual: i64,
    },

    #[error("action updated {address}, which is outside the declared updated addresses")]
    InvalidUpdatedAddresses { address: Address },

    #[error("transaction nonce must be non-negative, got {0}")]
    NegativeNonce(i64),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Decoding(#[from] ValueError),
}

/// A failure raised by an action's `execute`.
///
/// Execution failures do not abort the chain operation: they are recorded in
/// the action's evaluation and routed to `render_error`/`unrender_error`.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("insufficient balance of {ticker} for {owner}: have {available}, need {required}")]
    InsufficientBalance {
        owner: Address,
        ticker: String,
        available: i64,
        required: i64,
    },

    #[error("asset amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("action failed: {0}")]
    Failed(String),
}
