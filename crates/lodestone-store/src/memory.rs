//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use lodestone_core::{Action, Address, Block, ChainId, HashDigest, Transaction, TxId, Value};

use crate::error::{Result, StoreError};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore<A: Action> {
    inner: RwLock<Inner<A>>,
}

struct Inner<A: Action> {
    /// Blocks indexed by hash.
    blocks: HashMap<HashDigest, Block<A>>,

    /// Transactions indexed by id.
    transactions: HashMap<TxId, Transaction<A>>,

    /// Per-block delta snapshots.
    block_states: HashMap<HashDigest, BTreeMap<Address, Value>>,

    /// Staged transaction ids with their broadcast flag.
    staged: BTreeMap<TxId, bool>,

    /// The canonical chain pointer.
    canonical: Option<ChainId>,

    /// Per-chain ordered block hashes.
    indexes: HashMap<ChainId, Vec<HashDigest>>,

    /// Per-chain state references. The `(address, index)` key ordering
    /// matches numeric block order, like a big-endian-encoded key would.
    state_refs: HashMap<ChainId, BTreeMap<(Address, u64), HashDigest>>,

    /// Per-chain per-address confirmed transaction counts.
    tx_nonces: HashMap<ChainId, BTreeMap<Address, i64>>,
}

impl<A: Action> MemoryStore<A> {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                blocks: HashMap::new(),
                transactions: HashMap::new(),
                block_states: HashMap::new(),
                staged: BTreeMap::new(),
                canonical: None,
                indexes: HashMap::new(),
                state_refs: HashMap::new(),
                tx_nonces: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<A>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<A>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<A: Action> Default for MemoryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<A: Action> Store<A> for MemoryStore<A> {
    async fn put_block(&self, block: &Block<A>) -> Result<()> {
        self.write().blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    async fn get_block(&self, hash: &HashDigest) -> Result<Option<Block<A>>> {
        Ok(self.read().blocks.get(hash).cloned())
    }

    async fn delete_block(&self, hash: &HashDigest) -> Result<bool> {
        Ok(self.write().blocks.remove(hash).is_some())
    }

    async fn block_hashes(&self) -> Result<Vec<HashDigest>> {
        Ok(self.read().blocks.keys().copied().collect())
    }

    async fn put_transaction(&self, tx: &Transaction<A>) -> Result<()> {
        self.write().transactions.insert(tx.id(), tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: &TxId) -> Result<Option<Transaction<A>>> {
        Ok(self.read().transactions.get(id).cloned())
    }

    async fn delete_transaction(&self, id: &TxId) -> Result<bool> {
        Ok(self.write().transactions.remove(id).is_some())
    }

    async fn set_block_states(
        &self,
        hash: &HashDigest,
        states: &BTreeMap<Address, Value>,
    ) -> Result<()> {
        self.write().block_states.insert(*hash, states.clone());
        Ok(())
    }

    async fn get_block_states(
        &self,
        hash: &HashDigest,
    ) -> Result<Option<BTreeMap<Address, Value>>> {
        Ok(self.read().block_states.get(hash).cloned())
    }

    async fn stage_transaction_ids(&self, ids: &BTreeMap<TxId, bool>) -> Result<()> {
        let mut inner = self.write();
        for (id, broadcast) in ids {
            inner.staged.insert(*id, *broadcast);
        }
        Ok(())
    }

    async fn unstage_transaction_ids(&self, ids: &BTreeSet<TxId>) -> Result<()> {
        let mut inner = self.write();
        for id in ids {
            inner.staged.remove(id);
        }
        Ok(())
    }

    async fn staged_transaction_ids(&self, to_broadcast_only: bool) -> Result<Vec<TxId>> {
        Ok(self
            .read()
            .staged
            .iter()
            .filter(|(_, broadcast)| !to_broadcast_only || **broadcast)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn canonical_chain_id(&self) -> Result<Option<ChainId>> {
        Ok(self.read().canonical)
    }

    async fn set_canonical_chain_id(&self, chain: &ChainId) -> Result<()> {
        self.write().canonical = Some(*chain);
        Ok(())
    }

    async fn count_index(&self, chain: &ChainId) -> Result<u64> {
        Ok(self
            .read()
            .indexes
            .get(chain)
            .map(|index| index.len() as u64)
            .unwrap_or(0))
    }

    async fn index_block_hash(&self, chain: &ChainId, offset: i64) -> Result<Option<HashDigest>> {
        let inner = self.read();
        let Some(index) = inner.indexes.get(chain) else {
            return Ok(None);
        };
        let position = if offset < 0 {
            let back = offset.unsigned_abs() as usize;
            if back > index.len() {
                return Ok(None);
            }
            index.len() - back
        } else {
            offset as usize
        };
        Ok(index.get(position).copied())
    }

    async fn append_index(&self, chain: &ChainId, hash: HashDigest) -> Result<u64> {
        let mut inner = self.write();
        let index = inner.indexes.entry(*chain).or_default();
        if index.last() == Some(&hash) {
            return Err(StoreError::DuplicateAppend {
                chain: *chain,
                hash,
            });
        }
        index.push(hash);
        Ok(index.len() as u64)
    }

    async fn iterate_index(
        &self,
        chain: &ChainId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<HashDigest>> {
        let inner = self.read();
        let Some(index) = inner.indexes.get(chain) else {
            return Ok(Vec::new());
        };
        let take = limit.unwrap_or(u64::MAX) as usize;
        Ok(index
            .iter()
            .skip(offset as usize)
            .take(take)
            .copied()
            .collect())
    }

    async fn fork_index(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
    ) -> Result<()> {
        let mut inner = self.write();
        let copied: Vec<HashDigest> = inner
            .indexes
            .get(source)
            .map(|index| {
                index
                    .iter()
                    .take(branch_index as usize + 1)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        inner.indexes.insert(*destination, copied);
        Ok(())
    }

    async fn store_state_reference(
        &self,
        chain: &ChainId,
        addresses: &BTreeSet<Address>,
        block_hash: HashDigest,
        block_index: u64,
    ) -> Result<()> {
        let mut inner = self.write();
        let refs = inner.state_refs.entry(*chain).or_default();
        for address in addresses {
            refs.insert((*address, block_index), block_hash);
        }
        Ok(())
    }

    async fn lookup_state_reference(
        &self,
        chain: &ChainId,
        address: &Address,
        until_index: u64,
    ) -> Result<Option<(HashDigest, u64)>> {
        let inner = self.read();
        let Some(refs) = inner.state_refs.get(chain) else {
            return Ok(None);
        };
        Ok(refs
            .range((*address, 0)..=(*address, until_index))
            .next_back()
            .map(|((_, index), hash)| (*hash, *index)))
    }

    async fn iterate_state_references(
        &self,
        chain: &ChainId,
        address: &Address,
        highest: Option<u64>,
        lowest: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(HashDigest, u64)>> {
        let inner = self.read();
        let Some(refs) = inner.state_refs.get(chain) else {
            return Ok(Vec::new());
        };
        let low = lowest.unwrap_or(0);
        let high = highest.unwrap_or(u64::MAX);
        Ok(refs
            .range((*address, low)..=(*address, high))
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|((_, index), hash)| (*hash, *index))
            .collect())
    }

    async fn list_all_state_references(
        &self,
        chain: &ChainId,
        lowest: Option<u64>,
        highest: Option<u64>,
    ) -> Result<BTreeMap<Address, Vec<HashDigest>>> {
        let inner = self.read();
        let Some(refs) = inner.state_refs.get(chain) else {
            return Ok(BTreeMap::new());
        };
        let low = lowest.unwrap_or(0);
        let high = highest.unwrap_or(u64::MAX);
        let mut all: BTreeMap<Address, Vec<HashDigest>> = BTreeMap::new();
        for ((address, index), hash) in refs {
            if *index >= low && *index <= high {
                all.entry(*address).or_default().push(*hash);
            }
        }
        Ok(all)
    }

    async fn fork_state_references(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
        strip_addresses: &BTreeSet<Address>,
    ) -> Result<()> {
        let mut inner = self.write();
        let copied: BTreeMap<(Address, u64), HashDigest> = inner
            .state_refs
            .get(source)
            .map(|refs| {
                refs.iter()
                    .filter(|((address, index), _)| {
                        *index <= branch_index || !strip_addresses.contains(address)
                    })
                    .map(|(key, hash)| (*key, *hash))
                    .collect()
            })
            .unwrap_or_default();
        inner.state_refs.insert(*destination, copied);
        Ok(())
    }

    async fn get_tx_nonce(&self, chain: &ChainId, address: &Address) -> Result<i64> {
        Ok(self
            .read()
            .tx_nonces
            .get(chain)
            .and_then(|nonces| nonces.get(address))
            .copied()
            .unwrap_or(0))
    }

    async fn increase_tx_nonce(
        &self,
        chain: &ChainId,
        address: &Address,
        delta: i64,
    ) -> Result<()> {
        let mut inner = self.write();
        *inner
            .tx_nonces
            .entry(*chain)
            .or_default()
            .entry(*address)
            .or_insert(0) += delta;
        Ok(())
    }

    async fn list_tx_nonces(&self, chain: &ChainId) -> Result<BTreeMap<Address, i64>> {
        Ok(self
            .read()
            .tx_nonces
            .get(chain)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_chain_id(&self, chain: &ChainId) -> Result<()> {
        let mut inner = self.write();
        inner.indexes.remove(chain);
        inner.state_refs.remove(chain);
        inner.tx_nonces.remove(chain);
        if inner.canonical == Some(*chain) {
            inner.canonical = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lodestone_core::{
        ActionContext, ActionError, AccountStateDelta, CancelToken, PrivateKey, ValueError,
    };

    #[derive(Clone, Debug)]
    struct Noop;

    impl Action for Noop {
        fn execute(&self, context: &ActionContext) -> Result2 {
            Ok(context.previous_states.clone())
        }

        fn plain_value(&self) -> Value {
            Value::Null
        }

        fn load_plain_value(_: &Value) -> std::result::Result<Self, ValueError> {
            Ok(Noop)
        }
    }

    type Result2 = std::result::Result<AccountStateDelta, ActionError>;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn digest(byte: u8) -> HashDigest {
        HashDigest::from_bytes([byte; 32])
    }

    fn mine_test_block() -> Block<Noop> {
        Block::mine(
            0,
            0,
            None,
            None,
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
            vec![],
            9,
            &CancelToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_block_roundtrip() {
        let store = MemoryStore::<Noop>::new();
        let block = mine_test_block();

        store.put_block(&block).await.unwrap();
        let fetched = store.get_block(&block.hash()).await.unwrap().unwrap();
        assert_eq!(fetched.hash(), block.hash());

        assert!(store.delete_block(&block.hash()).await.unwrap());
        assert!(!store.delete_block(&block.hash()).await.unwrap());
        assert!(store.get_block(&block.hash()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_roundtrip() {
        let store = MemoryStore::<Noop>::new();
        let key = PrivateKey::from_seed(&[9; 32]);
        let tx = Transaction::new(
            &key,
            0,
            BTreeSet::new(),
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
            vec![Noop],
        )
        .unwrap();

        store.put_transaction(&tx).await.unwrap();
        let fetched = store.get_transaction(&tx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.id(), tx.id());
    }

    #[tokio::test]
    async fn test_index_offsets() {
        let store = MemoryStore::<Noop>::new();
        let chain = ChainId::random();

        assert_eq!(store.count_index(&chain).await.unwrap(), 0);
        assert_eq!(store.append_index(&chain, digest(1)).await.unwrap(), 1);
        assert_eq!(store.append_index(&chain, digest(2)).await.unwrap(), 2);
        assert_eq!(store.append_index(&chain, digest(3)).await.unwrap(), 3);

        assert_eq!(
            store.index_block_hash(&chain, 0).await.unwrap(),
            Some(digest(1))
        );
        assert_eq!(
            store.index_block_hash(&chain, -1).await.unwrap(),
            Some(digest(3))
        );
        assert_eq!(
            store.index_block_hash(&chain, -3).await.unwrap(),
            Some(digest(1))
        );
        assert_eq!(store.index_block_hash(&chain, 3).await.unwrap(), None);
        assert_eq!(store.index_block_hash(&chain, -4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_append_rejected() {
        let store = MemoryStore::<Noop>::new();
        let chain = ChainId::random();
        store.append_index(&chain, digest(1)).await.unwrap();
        assert!(matches!(
            store.append_index(&chain, digest(1)).await,
            Err(StoreError::DuplicateAppend { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_reference_lookup() {
        let store = MemoryStore::<Noop>::new();
        let chain = ChainId::random();
        let address = addr(1);

        for index in [1u64, 3, 5] {
            store
                .store_state_reference(
                    &chain,
                    &BTreeSet::from([address]),
                    digest(index as u8),
                    index,
                )
                .await
                .unwrap();
        }

        assert_eq!(
            store
                .lookup_state_reference(&chain, &address, 4)
                .await
                .unwrap(),
            Some((digest(3), 3))
        );
        assert_eq!(
            store
                .lookup_state_reference(&chain, &address, 0)
                .await
                .unwrap(),
            None
        );

        let descending = store
            .iterate_state_references(&chain, &address, None, None, None)
            .await
            .unwrap();
        assert_eq!(
            descending,
            vec![(digest(5), 5), (digest(3), 3), (digest(1), 1)]
        );

        let bounded = store
            .iterate_state_references(&chain, &address, Some(4), Some(2), Some(1))
            .await
            .unwrap();
        assert_eq!(bounded, vec![(digest(3), 3)]);
    }

    #[tokio::test]
    async fn test_fork_state_references_strips_above_branch() {
        let store = MemoryStore::<Noop>::new();
        let source = ChainId::random();
        let destination = ChainId::random();
        let stripped = addr(1);
        let kept = addr(2);

        for (address, index) in [(stripped, 2u64), (stripped, 5), (kept, 3)] {
            store
                .store_state_reference(
                    &source,
                    &BTreeSet::from([address]),
                    digest(index as u8),
                    index,
                )
                .await
                .unwrap();
        }

        store
            .fork_state_references(&source, &destination, 3, &BTreeSet::from([stripped]))
            .await
            .unwrap();

        assert_eq!(
            store
                .lookup_state_reference(&destination, &stripped, u64::MAX)
                .await
                .unwrap(),
            Some((digest(2), 2))
        );
        assert_eq!(
            store
                .lookup_state_reference(&destination, &kept, u64::MAX)
                .await
                .unwrap(),
            Some((digest(3), 3))
        );
    }

    #[tokio::test]
    async fn test_nonce_counters() {
        let store = MemoryStore::<Noop>::new();
        let chain = ChainId::random();
        let address = addr(7);

        assert_eq!(store.get_tx_nonce(&chain, &address).await.unwrap(), 0);
        store.increase_tx_nonce(&chain, &address, 2).await.unwrap();
        store.increase_tx_nonce(&chain, &address, 1).await.unwrap();
        assert_eq!(store.get_tx_nonce(&chain, &address).await.unwrap(), 3);

        let nonces = store.list_tx_nonces(&chain).await.unwrap();
        assert_eq!(nonces.get(&address), Some(&3));
    }

    #[tokio::test]
    async fn test_staging_broadcast_flags() {
        let store = MemoryStore::<Noop>::new();
        let local = TxId::from_bytes([1; 32]);
        let relayed = TxId::from_bytes([2; 32]);

        store
            .stage_transaction_ids(&BTreeMap::from([(local, true), (relayed, false)]))
            .await
            .unwrap();

        let mut all = store.staged_transaction_ids(false).await.unwrap();
        all.sort();
        assert_eq!(all, vec![local, relayed]);
        assert_eq!(
            store.staged_transaction_ids(true).await.unwrap(),
            vec![local]
        );

        store
            .unstage_transaction_ids(&BTreeSet::from([local]))
            .await
            .unwrap();
        assert_eq!(
            store.staged_transaction_ids(false).await.unwrap(),
            vec![relayed]
        );
    }

    #[tokio::test]
    async fn test_delete_chain_id_clears_namespaces() {
        let store = MemoryStore::<Noop>::new();
        let chain = ChainId::random();

        store.append_index(&chain, digest(1)).await.unwrap();
        store
            .increase_tx_nonce(&chain, &addr(1), 1)
            .await
            .unwrap();
        store.set_canonical_chain_id(&chain).await.unwrap();

        store.delete_chain_id(&chain).await.unwrap();
        assert_eq!(store.count_index(&chain).await.unwrap(), 0);
        assert_eq!(store.get_tx_nonce(&chain, &addr(1)).await.unwrap(), 0);
        assert_eq!(store.canonical_chain_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_states_none_vs_empty() {
        let store = MemoryStore::<Noop>::new();
        let hash = digest(1);

        assert!(store.get_block_states(&hash).await.unwrap().is_none());
        store
            .set_block_states(&hash, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(
            store.get_block_states(&hash).await.unwrap(),
            Some(BTreeMap::new())
        );
    }
}
