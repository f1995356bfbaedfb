//! # Lodestone Store
//!
//! Storage abstraction for the Lodestone blockchain engine. Provides a
//! trait-based interface for chain persistence with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The store module abstracts persistence behind the [`Store`] trait,
//! allowing the engine to be storage-agnostic. The primary implementation
//! is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! A store holds global keyspaces (blocks, transactions, per-block state
//! deltas, the staging pool, the canonical chain pointer) and keyspaces
//! scoped to a chain id (the ordered chain index, per-address state
//! references, per-address transaction nonce counters).
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Design Notes
//!
//! - **Missing keys are not failures**: lookups return `Ok(None)`
//! - **Writes are durable on return**
//! - **Appending the hash already at a chain's tip is rejected**
//! - **State-reference iteration follows numeric block-index order**

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::Store;
