//! # Lodestone Core
//!
//! Pure primitives for the Lodestone blockchain engine: blocks,
//! transactions, actions, account state, and canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Block`] - An immutable, proof-of-work-sealed record of transactions
//! - [`Transaction`] - A signed, ordered action list with a per-signer nonce
//! - [`Action`] - The pluggable interface for user code applied to state
//! - [`AccountStateDelta`] - A copy-on-write account state view
//! - [`Address`] / [`HashDigest`] / [`TxId`] / [`ChainId`] - Strong identifiers
//!
//! ## Canonicalization
//!
//! All hashes are computed over deterministic bencoding. See [`plain`].

pub mod account;
pub mod action;
pub mod block;
pub mod cancel;
pub mod crypto;
pub mod error;
pub mod plain;
pub mod transaction;
pub mod types;

pub use account::{AccountStateDelta, Currency, StateSnapshot};
pub use action::{Action, ActionContext, ActionEvaluation};
pub use block::{satisfies_difficulty, Block, Nonce};
pub use cancel::CancelToken;
pub use crypto::{keccak256, PrivateKey, PublicKey, Signature};
pub use error::{ActionError, BlockError, CryptoError, TxError, ValueError};
pub use plain::{Key, Value};
pub use transaction::Transaction;
pub use types::{Address, ChainId, HashDigest, TxId};
