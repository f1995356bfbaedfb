//! The BlockChain engine.
//!
//! A [`BlockChain`] coordinates a single-writer discipline over a pluggable
//! [`Store`]: it appends and mines blocks, evaluates their actions against
//! historical state, indexes state references so historical state at any
//! block is retrievable, and performs chain reorganization through
//! [`BlockChain::fork`] and [`BlockChain::swap`].
//!
//! One chain id is canonical in the store at any time. Construct exactly one
//! `BlockChain` per canonical namespace; the engine serializes its own
//! operations but cannot see a second instance.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use lodestone_core::{
    AccountStateDelta, Action, ActionEvaluation, Address, Block, CancelToken, ChainId,
    HashDigest, PrivateKey, StateSnapshot, Transaction, TxError, TxId, Value,
};
use lodestone_store::{Store, StoreError};

use crate::error::{ChainError, Result};
use crate::policy::BlockPolicy;

/// The blockchain engine.
///
/// Generic over the action type `A`, the store `S`, and the mining policy
/// `P`. All public methods take `&self`; internal locks provide the
/// ordering guarantees:
///
/// - a write lock serializes `append`, `swap`'s identity step, and staging
///   writes, so two appends are totally ordered;
/// - readers snapshot the chain identity under a read lock and see a
///   consistent chain version;
/// - a separate mutex serializes [`BlockChain::make_transaction`] so
///   consecutive nonces are handed to the same signer without gaps.
pub struct BlockChain<A, S, P>
where
    A: Action,
    S: Store<A>,
    P: BlockPolicy<A>,
{
    policy: Arc<P>,
    store: Arc<S>,
    id: RwLock<ChainId>,
    tx_lock: Mutex<()>,
    _actions: PhantomData<fn() -> A>,
}

impl<A, S, P> BlockChain<A, S, P>
where
    A: Action,
    S: Store<A>,
    P: BlockPolicy<A>,
{
    /// Open the canonical chain in `store`, designating a fresh chain id
    /// canonical if the store has none yet.
    pub async fn new(store: S, policy: P) -> Result<Self> {
        let store = Arc::new(store);
        let id = match store.canonical_chain_id().await? {
            Some(id) => id,
            None => {
                let id = ChainId::random();
                store.set_canonical_chain_id(&id).await?;
                id
            }
        };
        Ok(Self {
            policy: Arc::new(policy),
            store,
            id: RwLock::new(id),
            tx_lock: Mutex::new(()),
            _actions: PhantomData,
        })
    }

    /// The chain's current identity.
    pub async fn id(&self) -> ChainId {
        *self.id.read().await
    }

    /// The store this chain persists through.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The number of blocks in the chain.
    pub async fn count(&self) -> Result<u64> {
        let chain = *self.id.read().await;
        Ok(self.store.count_index(&chain).await?)
    }

    /// The highest-index block, if the chain is non-empty.
    pub async fn tip(&self) -> Result<Option<Block<A>>> {
        let chain = *self.id.read().await;
        self.tip_on(&chain).await
    }

    /// The genesis block, if the chain is non-empty.
    pub async fn genesis(&self) -> Result<Option<Block<A>>> {
        let chain = *self.id.read().await;
        match self.store.index_block_hash(&chain, 0).await? {
            Some(hash) => Ok(self.store.get_block(&hash).await?),
            None => Ok(None),
        }
    }

    /// Fetch a block by hash from the store.
    pub async fn get_block(&self, hash: &HashDigest) -> Result<Option<Block<A>>> {
        Ok(self.store.get_block(hash).await?)
    }

    /// Fetch a transaction by id from the store.
    pub async fn get_transaction(&self, id: &TxId) -> Result<Option<Transaction<A>>> {
        Ok(self.store.get_transaction(id).await?)
    }

    /// Whether `hash` is part of this chain.
    pub async fn contains_block(&self, hash: &HashDigest) -> Result<bool> {
        let chain = *self.id.read().await;
        let hashes = self.store.iterate_index(&chain, 0, None).await?;
        Ok(hashes.contains(hash))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Append
    // ─────────────────────────────────────────────────────────────────────

    /// Validate `block` against the current tip and the policy, persist it,
    /// and evaluate and render its actions.
    pub async fn append(&self, block: Block<A>, now: DateTime<Utc>) -> Result<()> {
        self.append_opts(block, now, true, true).await
    }

    /// [`BlockChain::append`] with evaluation and rendering individually
    /// switchable.
    ///
    /// Validation failures surface to the caller and leave the chain
    /// unchanged.
    pub async fn append_opts(
        &self,
        block: Block<A>,
        now: DateTime<Utc>,
        evaluate_actions: bool,
        render_actions: bool,
    ) -> Result<()> {
        let chain = {
            let guard = self.id.write().await;
            let chain = *guard;

            let tip = self.tip_on(&chain).await?;
            block.validate()?;
            block.validate_successor(tip.as_ref())?;
            self.policy.validate_next_block(tip.as_ref(), &block, now)?;

            // Per-signer nonce contiguity: in declared order, each
            // transaction's nonce must extend the signer's confirmed count
            // by the number of its transactions already seen in this block.
            let mut seen: BTreeMap<Address, i64> = BTreeMap::new();
            for tx in block.transactions() {
                let signer = tx.signer();
                let confirmed = self.store.get_tx_nonce(&chain, &signer).await?;
                let expected = confirmed + seen.get(&signer).copied().unwrap_or(0);
                if tx.nonce() != expected {
                    return Err(ChainError::InvalidTransaction(TxError::InvalidTxNonce {
                        signer,
                        expected,
                        actual: tx.nonce(),
                    }));
                }
                *seen.entry(signer).or_insert(0) += 1;
            }

            self.store.put_block(&block).await?;
            self.store.append_index(&chain, block.hash()).await?;

            let mut tx_ids = BTreeSet::new();
            for tx in block.transactions() {
                self.store.put_transaction(tx).await?;
                tx_ids.insert(tx.id());
            }
            for (signer, count) in seen {
                self.store.increase_tx_nonce(&chain, &signer, count).await?;
            }
            self.store.unstage_transaction_ids(&tx_ids).await?;

            info!(
                index = block.index(),
                hash = %block.hash(),
                transactions = block.transactions().len(),
                "appended block"
            );
            chain
        };

        if evaluate_actions {
            self.execute_actions_on(&chain, &block, render_actions)
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Action evaluation
    // ─────────────────────────────────────────────────────────────────────

    /// Evaluate `block`'s actions and persist its delta snapshot, skipping
    /// evaluation when the snapshot already exists.
    ///
    /// Idempotent with respect to state, not with respect to rendering:
    /// with `render` set the evaluations are always replayed and `render`
    /// callbacks fired in canonical order. State references are written
    /// only on the first execution.
    pub async fn execute_actions(&self, block: &Block<A>, render: bool) -> Result<()> {
        let chain = *self.id.read().await;
        self.execute_actions_on(&chain, block, render).await
    }

    async fn execute_actions_on(
        &self,
        chain: &ChainId,
        block: &Block<A>,
        render: bool,
    ) -> Result<()> {
        let existing = self.store.get_block_states(&block.hash()).await?;
        match (existing, render) {
            (Some(_), false) => {}
            (Some(_), true) => {
                let evaluations = self.evaluate_on(chain, block).await?;
                for evaluation in &evaluations {
                    evaluation.render();
                }
            }
            (None, render) => {
                let evaluations = self.evaluate_on(chain, block).await?;

                let states = evaluations
                    .last()
                    .map(|evaluation| evaluation.output.updated_states())
                    .unwrap_or_default();
                self.store.set_block_states(&block.hash(), &states).await?;

                let addresses: BTreeSet<Address> = states.keys().copied().collect();
                if !addresses.is_empty() {
                    self.store
                        .store_state_reference(chain, &addresses, block.hash(), block.index())
                        .await?;
                }
                debug!(
                    index = block.index(),
                    updated = addresses.len(),
                    "executed block actions"
                );

                if render {
                    for evaluation in &evaluations {
                        evaluation.render();
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate a block's actions against the chain state at its previous
    /// block, appending the policy's block action when one is configured.
    async fn evaluate_on(
        &self,
        chain: &ChainId,
        block: &Block<A>,
    ) -> Result<Vec<ActionEvaluation<A>>> {
        let base = self.snapshot_before(chain, block).await?;
        let mut evaluations = block.evaluate(Arc::clone(&base));

        if let Some(action) = self.policy.block_action() {
            let input = evaluations
                .last()
                .map(|evaluation| evaluation.output.clone())
                .unwrap_or_else(|| AccountStateDelta::new(base));
            let ordinal = evaluations.len() as u64;
            let signer = block.miner().unwrap_or(Address::ZERO);
            evaluations.push(ActionEvaluation::run(
                &action,
                signer,
                block.miner(),
                block.index(),
                input,
                block.evaluation_seed(ordinal),
            ));
        }

        Ok(evaluations)
    }

    /// Materialize the state the block's actions may read: every address
    /// its transactions declare (plus signers and miner), resolved at the
    /// previous block through the chain's state references.
    async fn snapshot_before(
        &self,
        chain: &ChainId,
        block: &Block<A>,
    ) -> Result<StateSnapshot> {
        let mut base = BTreeMap::new();
        let Some(previous_hash) = block.previous_hash() else {
            return Ok(Arc::new(base));
        };
        let previous = self
            .store
            .get_block(&previous_hash)
            .await?
            .ok_or(ChainError::UnknownBlock(previous_hash))?;

        let mut addresses: BTreeSet<Address> = BTreeSet::new();
        for tx in block.transactions() {
            addresses.insert(tx.signer());
            addresses.extend(tx.updated_addresses().iter().copied());
        }
        if let Some(miner) = block.miner() {
            addresses.insert(miner);
        }

        for address in addresses {
            let Some((reference, _)) = self
                .store
                .lookup_state_reference(chain, &address, previous.index())
                .await?
            else {
                continue;
            };
            let states = self
                .store
                .get_block_states(&reference)
                .await?
                .ok_or(ChainError::IncompleteBlockStates(reference))?;
            if let Some(value) = states.get(&address) {
                base.insert(address, value.clone());
            }
        }
        Ok(Arc::new(base))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Historical state queries
    // ─────────────────────────────────────────────────────────────────────

    /// The state of one address at `offset` (the tip when `None`).
    pub async fn get_state(
        &self,
        address: &Address,
        offset: Option<HashDigest>,
    ) -> Result<Option<Value>> {
        let mut states = self.get_states(&[*address], offset, false).await?;
        Ok(states.remove(address))
    }

    /// The states of `addresses` as of the block at `offset` (the tip when
    /// `None`). Addresses never updated are absent from the result.
    ///
    /// When a referenced block's delta snapshot is missing, fails with
    /// [`ChainError::IncompleteBlockStates`] unless `complete` is set, in
    /// which case the engine walks the chain from genesis executing every
    /// missing block, then retries.
    pub async fn get_states(
        &self,
        addresses: &[Address],
        offset: Option<HashDigest>,
        complete: bool,
    ) -> Result<BTreeMap<Address, Value>> {
        let guard = self.id.read().await;
        let chain = *guard;

        let offset = match offset {
            Some(hash) => hash,
            None => match self.store.index_block_hash(&chain, -1).await? {
                Some(hash) => hash,
                None => return Ok(BTreeMap::new()),
            },
        };
        let pivot = self
            .store
            .get_block(&offset)
            .await?
            .ok_or(ChainError::UnknownBlock(offset))?;

        // Group the addresses by the most recent block that updated each.
        let mut groups: BTreeMap<HashDigest, Vec<Address>> = BTreeMap::new();
        for address in addresses {
            if let Some((reference, _)) = self
                .store
                .lookup_state_reference(&chain, address, pivot.index())
                .await?
            {
                groups.entry(reference).or_default().push(*address);
            }
        }

        let mut result = BTreeMap::new();
        for (reference, group) in groups {
            let states = match self.store.get_block_states(&reference).await? {
                Some(states) => states,
                None if complete => {
                    self.recover_states(&chain).await?;
                    self.store
                        .get_block_states(&reference)
                        .await?
                        .ok_or(ChainError::IncompleteBlockStates(reference))?
                }
                None => return Err(ChainError::IncompleteBlockStates(reference)),
            };
            for address in group {
                if let Some(value) = states.get(&address) {
                    result.insert(address, value.clone());
                }
            }
        }
        Ok(result)
    }

    /// Walk the chain from genesis, executing every block whose delta
    /// snapshot is missing (without rendering).
    async fn recover_states(&self, chain: &ChainId) -> Result<()> {
        let hashes = self.store.iterate_index(chain, 0, None).await?;
        for hash in hashes {
            if self.store.get_block_states(&hash).await?.is_none() {
                let block = self
                    .store
                    .get_block(&hash)
                    .await?
                    .ok_or(ChainError::UnknownBlock(hash))?;
                debug!(index = block.index(), "recovering missing block states");
                self.execute_actions_on(chain, &block, false).await?;
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Staging and transaction creation
    // ─────────────────────────────────────────────────────────────────────

    /// Add transactions to the staging pool. The flag marks whether each
    /// should be broadcast (locally originated) or not (relayed).
    pub async fn stage_transactions(
        &self,
        transactions: Vec<(Transaction<A>, bool)>,
    ) -> Result<()> {
        let _guard = self.id.write().await;
        let mut flags = BTreeMap::new();
        for (tx, broadcast) in &transactions {
            self.store.put_transaction(tx).await?;
            flags.insert(tx.id(), *broadcast);
        }
        Ok(self.store.stage_transaction_ids(&flags).await?)
    }

    /// Remove transactions from the staging pool.
    pub async fn unstage_transactions(&self, ids: &BTreeSet<TxId>) -> Result<()> {
        let _guard = self.id.write().await;
        Ok(self.store.unstage_transaction_ids(ids).await?)
    }

    /// Every transaction currently staged.
    pub async fn staged_transactions(&self) -> Result<Vec<Transaction<A>>> {
        let ids = self.store.staged_transaction_ids(false).await?;
        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.store.get_transaction(&id).await? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    /// The confirmed transaction count for `address` on this chain.
    pub async fn get_tx_nonce(&self, address: &Address) -> Result<i64> {
        let chain = *self.id.read().await;
        Ok(self.store.get_tx_nonce(&chain, address).await?)
    }

    /// The next nonce to assign for `address`: the confirmed count extended
    /// by the longest contiguous run of staged nonces.
    pub async fn get_next_tx_nonce(&self, address: &Address) -> Result<i64> {
        let guard = self.id.read().await;
        let chain = *guard;
        let mut next = self.store.get_tx_nonce(&chain, address).await?;

        let mut staged: Vec<i64> = Vec::new();
        for id in self.store.staged_transaction_ids(false).await? {
            if let Some(tx) = self.store.get_transaction(&id).await? {
                if tx.signer() == *address {
                    staged.push(tx.nonce());
                }
            }
        }
        staged.sort_unstable();
        staged.dedup();
        for nonce in staged {
            if nonce == next {
                next += 1;
            } else if nonce > next {
                break;
            }
        }
        Ok(next)
    }

    /// Build, sign, and stage a transaction with the next nonce for the
    /// key's address.
    ///
    /// Serialized internally so concurrent callers receive consecutive
    /// nonces without gaps.
    pub async fn make_transaction(
        &self,
        private_key: &PrivateKey,
        updated_addresses: BTreeSet<Address>,
        timestamp: DateTime<Utc>,
        actions: Vec<A>,
    ) -> Result<Transaction<A>> {
        let _guard = self.tx_lock.lock().await;
        let nonce = self.get_next_tx_nonce(&private_key.to_address()).await?;
        let tx = Transaction::new(private_key, nonce, updated_addresses, timestamp, actions)?;
        self.stage_transactions(vec![(tx.clone(), true)]).await?;
        Ok(tx)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mining
    // ─────────────────────────────────────────────────────────────────────

    /// Mine the next block for `miner` out of the staged transactions whose
    /// nonces are contiguous with each signer's confirmed prefix, then
    /// append it.
    pub async fn mine_block(
        &self,
        miner: Address,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<Block<A>> {
        let (index, previous_hash, difficulty, transactions) = {
            let guard = self.id.read().await;
            let chain = *guard;
            let index = self.store.count_index(&chain).await?;
            let tip = self.tip_on(&chain).await?;
            let parent = match tip.as_ref().and_then(Block::previous_hash) {
                Some(hash) => self.store.get_block(&hash).await?,
                None => None,
            };
            let difficulty = self.policy.next_difficulty(tip.as_ref(), parent.as_ref());
            let transactions = self.gather_staged(&chain).await?;
            (index, tip.map(|b| b.hash()), difficulty, transactions)
        };

        let block = Block::mine(
            index,
            difficulty,
            Some(miner),
            previous_hash,
            now,
            transactions,
            rand::random::<u64>(),
            cancel,
        )?;
        info!(
            index,
            difficulty,
            hash = %block.hash(),
            transactions = block.transactions().len(),
            "mined block"
        );
        self.append(block.clone(), now).await?;
        Ok(block)
    }

    /// Staged transactions forming, per signer, a contiguous nonce run
    /// starting at the confirmed count. Stale nonces are skipped; gapped
    /// nonces are left staged.
    async fn gather_staged(&self, chain: &ChainId) -> Result<Vec<Transaction<A>>> {
        let mut by_signer: BTreeMap<Address, Vec<Transaction<A>>> = BTreeMap::new();
        for id in self.store.staged_transaction_ids(false).await? {
            if let Some(tx) = self.store.get_transaction(&id).await? {
                by_signer.entry(tx.signer()).or_default().push(tx);
            }
        }

        let mut gathered = Vec::new();
        for (signer, mut transactions) in by_signer {
            transactions.sort_by_key(Transaction::nonce);
            let mut expected = self.store.get_tx_nonce(chain, &signer).await?;
            for tx in transactions {
                if tx.nonce() == expected {
                    expected += 1;
                    gathered.push(tx);
                } else if tx.nonce() > expected {
                    break;
                }
            }
        }
        Ok(gathered)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fork and swap
    // ─────────────────────────────────────────────────────────────────────

    /// Create a sibling chain sharing this chain's prefix up to and
    /// including `branch_hash`.
    ///
    /// The sibling gets a fresh chain id, a copy of the index up to the
    /// branch, state references truncated at the branch for every address
    /// updated above it, and nonce counters reduced by the transactions in
    /// the stripped blocks. The sibling performs no rendering until it is
    /// swapped in.
    pub async fn fork(&self, branch_hash: HashDigest, cancel: &CancelToken) -> Result<Self> {
        let guard = self.id.read().await;
        let chain = *guard;

        let branch = self
            .store
            .get_block(&branch_hash)
            .await?
            .ok_or(ChainError::UnknownBlock(branch_hash))?;
        let destination = ChainId::random();

        self.store
            .fork_index(&chain, &destination, branch.index())
            .await?;

        // Addresses whose state was updated strictly above the branch.
        let stripped: BTreeSet<Address> = self
            .store
            .list_all_state_references(&chain, Some(branch.index() + 1), None)
            .await?
            .into_keys()
            .collect();

        // Per-signer counts of transactions in the stripped blocks.
        let mut stripped_counts: BTreeMap<Address, i64> = BTreeMap::new();
        for hash in self
            .store
            .iterate_index(&chain, branch.index() + 1, None)
            .await?
        {
            if cancel.is_canceled() {
                return Err(ChainError::Canceled);
            }
            let block = self
                .store
                .get_block(&hash)
                .await?
                .ok_or(ChainError::UnknownBlock(hash))?;
            for tx in block.transactions() {
                *stripped_counts.entry(tx.signer()).or_insert(0) += 1;
            }
        }

        self.store
            .fork_state_references(&chain, &destination, branch.index(), &stripped)
            .await?;

        for (address, nonce) in self.store.list_tx_nonces(&chain).await? {
            let carried = nonce - stripped_counts.get(&address).copied().unwrap_or(0);
            if carried < 0 {
                return Err(ChainError::Store(StoreError::Corrupt(format!(
                    "nonce for {address} would become negative when forking at {branch_hash}"
                ))));
            }
            if carried > 0 {
                self.store
                    .increase_tx_nonce(&destination, &address, carried)
                    .await?;
            }
        }

        info!(
            branch = branch.index(),
            stripped = stripped.len(),
            destination = %destination,
            "forked chain"
        );
        Ok(Self {
            policy: Arc::clone(&self.policy),
            store: Arc::clone(&self.store),
            id: RwLock::new(destination),
            tx_lock: Mutex::new(()),
            _actions: PhantomData,
        })
    }

    /// Atomically replace this chain's identity with `other`'s.
    ///
    /// With `render` set, actions above the branchpoint on the outgoing
    /// chain are unrendered in reverse canonical order before the identity
    /// write, and actions above the branchpoint on the incoming chain are
    /// rendered in canonical order after it. Cancellation is observed only
    /// before the identity write.
    pub async fn swap(&self, other: &Self, render: bool, cancel: &CancelToken) -> Result<()> {
        let other_id = other.id().await;

        let branch_index = if render {
            let this_id = *self.id.read().await;
            let this_len = self.store.count_index(&this_id).await?;
            let other_len = self.store.count_index(&other_id).await?;

            // Topmost common block: walk both chains backward in lockstep.
            let mut common: Option<u64> = None;
            for index in (0..this_len.min(other_len)).rev() {
                if cancel.is_canceled() {
                    return Err(ChainError::Canceled);
                }
                let ours = self.store.index_block_hash(&this_id, index as i64).await?;
                let theirs = self.store.index_block_hash(&other_id, index as i64).await?;
                if ours.is_some() && ours == theirs {
                    common = Some(index);
                    break;
                }
            }

            // Unrender the outgoing suffix, tip first, evaluations reversed.
            let start = common.map(|c| c + 1).unwrap_or(0);
            for index in (start..this_len).rev() {
                if cancel.is_canceled() {
                    return Err(ChainError::Canceled);
                }
                let block = self.block_at(&this_id, index).await?;
                let evaluations = self.evaluate_on(&this_id, &block).await?;
                for evaluation in evaluations.iter().rev() {
                    evaluation.unrender();
                }
            }
            common
        } else {
            None
        };

        // Identity write. Not cancelable from here on.
        let old_id = {
            let mut guard = self.id.write().await;
            let old = *guard;
            *guard = other_id;
            self.store.set_canonical_chain_id(&other_id).await?;
            old
        };
        if old_id != other_id {
            self.store.delete_chain_id(&old_id).await?;
        }
        info!(old = %old_id, new = %other_id, "swapped chain identity");

        if render {
            let other_len = self.store.count_index(&other_id).await?;
            let start = branch_index.map(|c| c + 1).unwrap_or(0);
            for index in start..other_len {
                let block = self.block_at(&other_id, index).await?;
                let evaluations = self.evaluate_on(&other_id, &block).await?;
                for evaluation in &evaluations {
                    evaluation.render();
                }
            }
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Peer-sync queries
    // ─────────────────────────────────────────────────────────────────────

    /// Block hashes starting at the tip, stepping backward with
    /// geometrically increasing stride once `threshold` entries have been
    /// emitted. Always ends at the genesis hash.
    pub async fn block_locator(&self, threshold: usize) -> Result<Vec<HashDigest>> {
        let chain = *self.id.read().await;
        let len = self.store.count_index(&chain).await?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut hashes = Vec::new();
        let mut stride: u64 = 1;
        let mut index = len - 1;
        loop {
            if let Some(hash) = self.store.index_block_hash(&chain, index as i64).await? {
                hashes.push(hash);
            }
            if index == 0 {
                break;
            }
            if hashes.len() >= threshold {
                stride = stride.saturating_mul(2);
            }
            index = index.saturating_sub(stride);
        }
        Ok(hashes)
    }

    /// The first hash in `locator` that belongs to this chain, falling back
    /// to the genesis hash.
    pub async fn find_branch_point(&self, locator: &[HashDigest]) -> Result<Option<HashDigest>> {
        let chain = *self.id.read().await;
        let index = self.store.iterate_index(&chain, 0, None).await?;
        Ok(branch_point_in(&index, locator))
    }

    /// Up to `count` hashes along this chain starting at the locator's
    /// branchpoint, terminating early once `stop` is emitted.
    pub async fn find_next_hashes(
        &self,
        locator: &[HashDigest],
        stop: Option<HashDigest>,
        count: usize,
    ) -> Result<Vec<HashDigest>> {
        let chain = *self.id.read().await;
        let index = self.store.iterate_index(&chain, 0, None).await?;
        let Some(branch) = branch_point_in(&index, locator) else {
            return Ok(Vec::new());
        };
        let Some(start) = index.iter().position(|hash| *hash == branch) else {
            return Ok(Vec::new());
        };

        let mut hashes = Vec::new();
        for hash in &index[start..] {
            if hashes.len() >= count {
                break;
            }
            hashes.push(*hash);
            if stop == Some(*hash) {
                break;
            }
        }
        Ok(hashes)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    async fn tip_on(&self, chain: &ChainId) -> Result<Option<Block<A>>> {
        match self.store.index_block_hash(chain, -1).await? {
            Some(hash) => Ok(self.store.get_block(&hash).await?),
            None => Ok(None),
        }
    }

    async fn block_at(&self, chain: &ChainId, index: u64) -> Result<Block<A>> {
        let hash = self
            .store
            .index_block_hash(chain, index as i64)
            .await?
            .ok_or_else(|| {
                ChainError::Store(StoreError::Corrupt(format!(
                    "chain {chain} has no block at index {index}"
                )))
            })?;
        self.store
            .get_block(&hash)
            .await?
            .ok_or(ChainError::UnknownBlock(hash))
    }
}

fn branch_point_in(index: &[HashDigest], locator: &[HashDigest]) -> Option<HashDigest> {
    let known: HashSet<&HashDigest> = index.iter().collect();
    locator
        .iter()
        .find(|hash| known.contains(hash))
        .copied()
        .or_else(|| index.first().copied())
}
