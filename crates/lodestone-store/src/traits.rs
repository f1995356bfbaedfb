//! Store trait: the abstract interface for chain persistence.
//!
//! This trait allows the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).
//!
//! The store is a collection of global keyspaces (blocks, transactions,
//! per-block state deltas, the staging pool, the canonical chain pointer)
//! plus keyspaces scoped to a [`ChainId`] (the chain index, per-address
//! state references, per-address transaction nonces).

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use lodestone_core::{Action, Address, Block, ChainId, HashDigest, Transaction, TxId, Value};

use crate::error::Result;

/// The Store trait: async interface for chain persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the
/// runtime.
///
/// # Design Notes
///
/// - **Missing keys are not failures**: lookups return `Ok(None)`.
/// - **Durability**: every write is durable on return.
/// - **Idempotent writes** where logically possible; appending the hash
///   already at a chain's tip is an error.
/// - **Ordering**: state-reference iteration follows numeric block-index
///   order per address, as if keys encoded the index big-endian.
#[async_trait]
pub trait Store<A: Action>: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // Blocks (global)
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a block under its hash.
    async fn put_block(&self, block: &Block<A>) -> Result<()>;

    /// Fetch a block by hash.
    async fn get_block(&self, hash: &HashDigest) -> Result<Option<Block<A>>>;

    /// Delete a block. Returns whether it existed. Only orphaned blocks may
    /// be deleted.
    async fn delete_block(&self, hash: &HashDigest) -> Result<bool>;

    /// Every block hash in the store, in no particular order.
    async fn block_hashes(&self) -> Result<Vec<HashDigest>>;

    // ─────────────────────────────────────────────────────────────────────
    // Transactions (global)
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a transaction under its id.
    async fn put_transaction(&self, tx: &Transaction<A>) -> Result<()>;

    /// Fetch a transaction by id.
    async fn get_transaction(&self, id: &TxId) -> Result<Option<Transaction<A>>>;

    /// Delete a transaction. Returns whether it existed.
    async fn delete_transaction(&self, id: &TxId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────
    // Per-block state deltas (global)
    // ─────────────────────────────────────────────────────────────────────

    /// Record the delta snapshot a block produced: only the addresses whose
    /// state that block updated.
    async fn set_block_states(
        &self,
        hash: &HashDigest,
        states: &BTreeMap<Address, Value>,
    ) -> Result<()>;

    /// Fetch a block's delta snapshot. `None` means the block has not been
    /// executed with state persistence yet; `Some` with an empty map means
    /// it executed and touched nothing.
    async fn get_block_states(
        &self,
        hash: &HashDigest,
    ) -> Result<Option<BTreeMap<Address, Value>>>;

    // ─────────────────────────────────────────────────────────────────────
    // Staging pool (global)
    // ─────────────────────────────────────────────────────────────────────

    /// Add transaction ids to the staging pool. The flag marks whether the
    /// transaction should be broadcast (locally originated) or not
    /// (relayed).
    async fn stage_transaction_ids(&self, ids: &BTreeMap<TxId, bool>) -> Result<()>;

    /// Remove transaction ids from the staging pool.
    async fn unstage_transaction_ids(&self, ids: &BTreeSet<TxId>) -> Result<()>;

    /// List staged transaction ids, optionally only those flagged for
    /// broadcast.
    async fn staged_transaction_ids(&self, to_broadcast_only: bool) -> Result<Vec<TxId>>;

    // ─────────────────────────────────────────────────────────────────────
    // Canonical chain pointer (global)
    // ─────────────────────────────────────────────────────────────────────

    /// The chain currently designated canonical, if any.
    async fn canonical_chain_id(&self) -> Result<Option<ChainId>>;

    /// Designate a chain canonical.
    async fn set_canonical_chain_id(&self, chain: &ChainId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Chain index (per chain)
    // ─────────────────────────────────────────────────────────────────────

    /// The number of blocks in a chain's index.
    async fn count_index(&self, chain: &ChainId) -> Result<u64>;

    /// The hash at `offset` in a chain's index. Negative offsets count back
    /// from the tip: −1 is the tip.
    async fn index_block_hash(&self, chain: &ChainId, offset: i64) -> Result<Option<HashDigest>>;

    /// Append a hash to a chain's index, returning the new length. Fails if
    /// the hash is already the tip.
    async fn append_index(&self, chain: &ChainId, hash: HashDigest) -> Result<u64>;

    /// Iterate a chain's index from `offset`, at most `limit` entries.
    async fn iterate_index(
        &self,
        chain: &ChainId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<HashDigest>>;

    /// Copy a chain's index up to and including `branch_index` into another
    /// chain's index namespace.
    async fn fork_index(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // State references (per chain)
    // ─────────────────────────────────────────────────────────────────────

    /// Record that every address in `addresses` was updated by the block at
    /// `(block_hash, block_index)`.
    async fn store_state_reference(
        &self,
        chain: &ChainId,
        addresses: &BTreeSet<Address>,
        block_hash: HashDigest,
        block_index: u64,
    ) -> Result<()>;

    /// The greatest reference for `address` whose index is at most
    /// `until_index`.
    async fn lookup_state_reference(
        &self,
        chain: &ChainId,
        address: &Address,
        until_index: u64,
    ) -> Result<Option<(HashDigest, u64)>>;

    /// References for `address` in descending index order, bounded to
    /// `[lowest, highest]` when given, at most `limit` entries.
    async fn iterate_state_references(
        &self,
        chain: &ChainId,
        address: &Address,
        highest: Option<u64>,
        lowest: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(HashDigest, u64)>>;

    /// Every address's references (hashes in ascending index order),
    /// bounded to `[lowest, highest]` when given. Used by state sync.
    async fn list_all_state_references(
        &self,
        chain: &ChainId,
        lowest: Option<u64>,
        highest: Option<u64>,
    ) -> Result<BTreeMap<Address, Vec<HashDigest>>>;

    /// Copy `source`'s references into `destination`, truncating at
    /// `branch_index` for the addresses in `strip_addresses` and preserving
    /// the rest in full.
    async fn fork_state_references(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
        strip_addresses: &BTreeSet<Address>,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Transaction nonces (per chain)
    // ─────────────────────────────────────────────────────────────────────

    /// The count of confirmed transactions signed by `address` under
    /// `chain`. Zero when unknown.
    async fn get_tx_nonce(&self, chain: &ChainId, address: &Address) -> Result<i64>;

    /// Add `delta` to `address`'s confirmed-transaction count.
    async fn increase_tx_nonce(
        &self,
        chain: &ChainId,
        address: &Address,
        delta: i64,
    ) -> Result<()>;

    /// Every known per-address nonce counter under `chain`.
    async fn list_tx_nonces(&self, chain: &ChainId) -> Result<BTreeMap<Address, i64>>;

    // ─────────────────────────────────────────────────────────────────────
    // Chain lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Remove every keyspace scoped to `chain`.
    async fn delete_chain_id(&self, chain: &ChainId) -> Result<()>;
}
