//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Lodestone. It uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//!
//! Blocks, transactions, and block-state deltas are stored as their
//! canonical bencoding, so what is hashed is exactly what is persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use lodestone_core::{
    Action, Address, Block, ChainId, HashDigest, Key, Transaction, TxId, Value,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// The connection lives behind a mutex; every operation runs on the
/// blocking pool so the async runtime is never stalled.
pub struct SqliteStore<A: Action> {
    conn: Arc<Mutex<Connection>>,
    _actions: PhantomData<fn() -> A>,
}

impl<A: Action> SqliteStore<A> {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _actions: PhantomData,
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _actions: PhantomData,
        })
    }

    /// Run a blocking operation against the connection on the blocking
    /// pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
    }
}

fn chain_bytes(chain: &ChainId) -> Vec<u8> {
    chain.as_bytes().to_vec()
}

fn decode_chain(bytes: Vec<u8>) -> Result<ChainId> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("chain id must be 16 bytes".into()))?;
    Ok(ChainId::from_bytes(arr))
}

fn decode_digest(bytes: Vec<u8>) -> Result<HashDigest> {
    HashDigest::try_from(bytes.as_slice())
        .map_err(|_| StoreError::Corrupt("hash must be 32 bytes".into()))
}

fn decode_addr(bytes: Vec<u8>) -> Result<Address> {
    Address::try_from(bytes.as_slice())
        .map_err(|_| StoreError::Corrupt("address must be 20 bytes".into()))
}

fn encode_states(states: &BTreeMap<Address, Value>) -> Vec<u8> {
    let entries = states
        .iter()
        .map(|(address, value)| (Key::Bytes(address.as_bytes().to_vec()), value.clone()))
        .collect();
    Value::Dict(entries).encode()
}

fn decode_states(bytes: &[u8]) -> Result<BTreeMap<Address, Value>> {
    let value = Value::decode(bytes)?;
    let entries = value
        .as_dict()
        .ok_or_else(|| StoreError::Corrupt("block states must be a dict".into()))?;
    let mut states = BTreeMap::new();
    for (key, state) in entries {
        let Key::Bytes(raw) = key else {
            return Err(StoreError::Corrupt("block state key must be bytes".into()));
        };
        states.insert(decode_addr(raw.clone())?, state.clone());
    }
    Ok(states)
}

#[async_trait]
impl<A: Action> Store<A> for SqliteStore<A> {
    async fn put_block(&self, block: &Block<A>) -> Result<()> {
        let hash = block.hash();
        let encoded = block.to_plain_value().encode();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blocks (hash, encoded) VALUES (?1, ?2)",
                params![hash.as_bytes().as_slice(), encoded],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_block(&self, hash: &HashDigest) -> Result<Option<Block<A>>> {
        let hash = *hash;
        let encoded: Option<Vec<u8>> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT encoded FROM blocks WHERE hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;
        match encoded {
            None => Ok(None),
            Some(bytes) => {
                let value = Value::decode(&bytes)?;
                Ok(Some(Block::from_plain_value(&value)?))
            }
        }
    }

    async fn delete_block(&self, hash: &HashDigest) -> Result<bool> {
        let hash = *hash;
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM blocks WHERE hash = ?1",
                params![hash.as_bytes().as_slice()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn block_hashes(&self) -> Result<Vec<HashDigest>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT hash FROM blocks")?;
            let hashes = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            hashes.into_iter().map(decode_digest).collect()
        })
        .await
    }

    async fn put_transaction(&self, tx: &Transaction<A>) -> Result<()> {
        let id = tx.id();
        let encoded = tx.to_plain_value().encode();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO transactions (id, encoded) VALUES (?1, ?2)",
                params![id.as_bytes().as_slice(), encoded],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_transaction(&self, id: &TxId) -> Result<Option<Transaction<A>>> {
        let id = *id;
        let encoded: Option<Vec<u8>> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT encoded FROM transactions WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;
        match encoded {
            None => Ok(None),
            Some(bytes) => {
                let value = Value::decode(&bytes)?;
                Ok(Some(Transaction::from_plain_value(&value)?))
            }
        }
    }

    async fn delete_transaction(&self, id: &TxId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM transactions WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn set_block_states(
        &self,
        hash: &HashDigest,
        states: &BTreeMap<Address, Value>,
    ) -> Result<()> {
        let hash = *hash;
        let encoded = encode_states(states);
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO block_states (block_hash, encoded) VALUES (?1, ?2)",
                params![hash.as_bytes().as_slice(), encoded],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_block_states(
        &self,
        hash: &HashDigest,
    ) -> Result<Option<BTreeMap<Address, Value>>> {
        let hash = *hash;
        let encoded: Option<Vec<u8>> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT encoded FROM block_states WHERE block_hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;
        match encoded {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode_states(&bytes)?)),
        }
    }

    async fn stage_transaction_ids(&self, ids: &BTreeMap<TxId, bool>) -> Result<()> {
        let ids = ids.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for (id, broadcast) in &ids {
                tx.execute(
                    "INSERT OR REPLACE INTO staged_transactions (tx_id, broadcast)
                     VALUES (?1, ?2)",
                    params![id.as_bytes().as_slice(), *broadcast as i64],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn unstage_transaction_ids(&self, ids: &BTreeSet<TxId>) -> Result<()> {
        let ids = ids.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                tx.execute(
                    "DELETE FROM staged_transactions WHERE tx_id = ?1",
                    params![id.as_bytes().as_slice()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn staged_transaction_ids(&self, to_broadcast_only: bool) -> Result<Vec<TxId>> {
        self.run(move |conn| {
            let sql = if to_broadcast_only {
                "SELECT tx_id FROM staged_transactions WHERE broadcast = 1 ORDER BY tx_id"
            } else {
                "SELECT tx_id FROM staged_transactions ORDER BY tx_id"
            };
            let mut stmt = conn.prepare(sql)?;
            let raw = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|bytes| {
                    let arr: [u8; 32] = bytes
                        .try_into()
                        .map_err(|_| StoreError::Corrupt("tx id must be 32 bytes".into()))?;
                    Ok(TxId::from_bytes(arr))
                })
                .collect()
        })
        .await
    }

    async fn canonical_chain_id(&self) -> Result<Option<ChainId>> {
        let raw: Option<Vec<u8>> = self
            .run(|conn| {
                conn.query_row("SELECT chain_id FROM canonical_chain", [], |row| row.get(0))
                    .optional()
                    .map_err(StoreError::from)
            })
            .await?;
        raw.map(decode_chain).transpose()
    }

    async fn set_canonical_chain_id(&self, chain: &ChainId) -> Result<()> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO canonical_chain (singleton, chain_id) VALUES (0, ?1)
                 ON CONFLICT(singleton) DO UPDATE SET chain_id = excluded.chain_id",
                params![chain],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_index(&self, chain: &ChainId) -> Result<u64> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chain_index WHERE chain_id = ?1",
                params![chain],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn index_block_hash(&self, chain: &ChainId, offset: i64) -> Result<Option<HashDigest>> {
        let chain = chain_bytes(chain);
        let raw: Option<Vec<u8>> = self
            .run(move |conn| {
                let row = if offset < 0 {
                    conn.query_row(
                        "SELECT hash FROM chain_index WHERE chain_id = ?1
                         ORDER BY idx DESC LIMIT 1 OFFSET ?2",
                        params![chain, -offset - 1],
                        |row| row.get(0),
                    )
                } else {
                    conn.query_row(
                        "SELECT hash FROM chain_index WHERE chain_id = ?1 AND idx = ?2",
                        params![chain, offset],
                        |row| row.get(0),
                    )
                };
                row.optional().map_err(StoreError::from)
            })
            .await?;
        raw.map(decode_digest).transpose()
    }

    async fn append_index(&self, chain_id: &ChainId, hash: HashDigest) -> Result<u64> {
        let chain_id = *chain_id;
        let chain = chain_bytes(&chain_id);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM chain_index WHERE chain_id = ?1",
                params![chain],
                |row| row.get(0),
            )?;
            if count > 0 {
                let tip: Vec<u8> = tx.query_row(
                    "SELECT hash FROM chain_index WHERE chain_id = ?1 AND idx = ?2",
                    params![chain, count - 1],
                    |row| row.get(0),
                )?;
                if tip == hash.as_bytes().as_slice() {
                    return Err(StoreError::DuplicateAppend {
                        chain: chain_id,
                        hash,
                    });
                }
            }
            tx.execute(
                "INSERT INTO chain_index (chain_id, idx, hash) VALUES (?1, ?2, ?3)",
                params![chain, count, hash.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(count as u64 + 1)
        })
        .await
    }

    async fn iterate_index(
        &self,
        chain: &ChainId,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<HashDigest>> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT hash FROM chain_index WHERE chain_id = ?1
                 ORDER BY idx LIMIT ?2 OFFSET ?3",
            )?;
            let take = limit.map(|n| n as i64).unwrap_or(-1);
            let raw = stmt
                .query_map(params![chain, take, offset as i64], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(decode_digest).collect()
        })
        .await
    }

    async fn fork_index(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
    ) -> Result<()> {
        let source = chain_bytes(source);
        let destination = chain_bytes(destination);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chain_index WHERE chain_id = ?1",
                params![destination],
            )?;
            tx.execute(
                "INSERT INTO chain_index (chain_id, idx, hash)
                 SELECT ?1, idx, hash FROM chain_index
                 WHERE chain_id = ?2 AND idx <= ?3",
                params![destination, source, branch_index as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn store_state_reference(
        &self,
        chain: &ChainId,
        addresses: &BTreeSet<Address>,
        block_hash: HashDigest,
        block_index: u64,
    ) -> Result<()> {
        let chain = chain_bytes(chain);
        let addresses = addresses.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for address in &addresses {
                tx.execute(
                    "INSERT OR REPLACE INTO state_references
                     (chain_id, address, block_index, block_hash)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        chain,
                        address.as_bytes().as_slice(),
                        block_index as i64,
                        block_hash.as_bytes().as_slice(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn lookup_state_reference(
        &self,
        chain: &ChainId,
        address: &Address,
        until_index: u64,
    ) -> Result<Option<(HashDigest, u64)>> {
        let chain = chain_bytes(chain);
        let address = *address;
        let row: Option<(Vec<u8>, i64)> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT block_hash, block_index FROM state_references
                     WHERE chain_id = ?1 AND address = ?2 AND block_index <= ?3
                     ORDER BY block_index DESC LIMIT 1",
                    params![chain, address.as_bytes().as_slice(), until_index as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;
        row.map(|(hash, index)| Ok((decode_digest(hash)?, index as u64)))
            .transpose()
    }

    async fn iterate_state_references(
        &self,
        chain: &ChainId,
        address: &Address,
        highest: Option<u64>,
        lowest: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(HashDigest, u64)>> {
        let chain = chain_bytes(chain);
        let address = *address;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT block_hash, block_index FROM state_references
                 WHERE chain_id = ?1 AND address = ?2
                   AND block_index >= ?3 AND block_index <= ?4
                 ORDER BY block_index DESC LIMIT ?5",
            )?;
            let low = lowest.unwrap_or(0) as i64;
            let high = highest.map(|h| h as i64).unwrap_or(i64::MAX);
            let take = limit.map(|n| n as i64).unwrap_or(-1);
            let rows = stmt
                .query_map(
                    params![chain, address.as_bytes().as_slice(), low, high, take],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(hash, index)| Ok((decode_digest(hash)?, index as u64)))
                .collect()
        })
        .await
    }

    async fn list_all_state_references(
        &self,
        chain: &ChainId,
        lowest: Option<u64>,
        highest: Option<u64>,
    ) -> Result<BTreeMap<Address, Vec<HashDigest>>> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address, block_hash FROM state_references
                 WHERE chain_id = ?1 AND block_index >= ?2 AND block_index <= ?3
                 ORDER BY address, block_index",
            )?;
            let low = lowest.unwrap_or(0) as i64;
            let high = highest.map(|h| h as i64).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(params![chain, low, high], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut all: BTreeMap<Address, Vec<HashDigest>> = BTreeMap::new();
            for (address, hash) in rows {
                all.entry(decode_addr(address)?)
                    .or_default()
                    .push(decode_digest(hash)?);
            }
            Ok(all)
        })
        .await
    }

    async fn fork_state_references(
        &self,
        source: &ChainId,
        destination: &ChainId,
        branch_index: u64,
        strip_addresses: &BTreeSet<Address>,
    ) -> Result<()> {
        let source = chain_bytes(source);
        let destination = chain_bytes(destination);
        let strip = strip_addresses.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM state_references WHERE chain_id = ?1",
                params![destination],
            )?;
            {
                let mut stmt = tx.prepare(
                    "SELECT address, block_index, block_hash FROM state_references
                     WHERE chain_id = ?1 ORDER BY address, block_index",
                )?;
                let rows = stmt
                    .query_map(params![source], |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                for (address_raw, index, hash) in rows {
                    let address = decode_addr(address_raw.clone())?;
                    if index as u64 > branch_index && strip.contains(&address) {
                        continue;
                    }
                    tx.execute(
                        "INSERT INTO state_references
                         (chain_id, address, block_index, block_hash)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![destination, address_raw, index, hash],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_tx_nonce(&self, chain: &ChainId, address: &Address) -> Result<i64> {
        let chain = chain_bytes(chain);
        let address = *address;
        self.run(move |conn| {
            let nonce: Option<i64> = conn
                .query_row(
                    "SELECT nonce FROM tx_nonces WHERE chain_id = ?1 AND address = ?2",
                    params![chain, address.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(nonce.unwrap_or(0))
        })
        .await
    }

    async fn increase_tx_nonce(
        &self,
        chain: &ChainId,
        address: &Address,
        delta: i64,
    ) -> Result<()> {
        let chain = chain_bytes(chain);
        let address = *address;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tx_nonces (chain_id, address, nonce) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chain_id, address) DO UPDATE SET nonce = nonce + excluded.nonce",
                params![chain, address.as_bytes().as_slice(), delta],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_tx_nonces(&self, chain: &ChainId) -> Result<BTreeMap<Address, i64>> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address, nonce FROM tx_nonces WHERE chain_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![chain], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(address, nonce)| Ok((decode_addr(address)?, nonce)))
                .collect()
        })
        .await
    }

    async fn delete_chain_id(&self, chain: &ChainId) -> Result<()> {
        let chain = chain_bytes(chain);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chain_index WHERE chain_id = ?1",
                params![chain],
            )?;
            tx.execute(
                "DELETE FROM state_references WHERE chain_id = ?1",
                params![chain],
            )?;
            tx.execute("DELETE FROM tx_nonces WHERE chain_id = ?1", params![chain])?;
            tx.execute(
                "DELETE FROM canonical_chain WHERE chain_id = ?1",
                params![chain],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lodestone_core::{
        AccountStateDelta, ActionContext, ActionError, CancelToken, PrivateKey, ValueError,
    };

    #[derive(Clone, Debug)]
    struct Noop;

    impl Action for Noop {
        fn execute(
            &self,
            context: &ActionContext,
        ) -> std::result::Result<AccountStateDelta, ActionError> {
            Ok(context.previous_states.clone())
        }

        fn plain_value(&self) -> Value {
            Value::Null
        }

        fn load_plain_value(_: &Value) -> std::result::Result<Self, ValueError> {
            Ok(Noop)
        }
    }

    fn digest(byte: u8) -> HashDigest {
        HashDigest::from_bytes([byte; 32])
    }

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_block_survives_encoding() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let key = PrivateKey::from_seed(&[1; 32]);
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let tx = Transaction::new(
            &key,
            0,
            BTreeSet::new(),
            timestamp,
            vec![Noop],
        )
        .unwrap();
        let block = Block::mine(
            0,
            0,
            Some(key.to_address()),
            None,
            timestamp,
            vec![tx],
            3,
            &CancelToken::new(),
        )
        .unwrap();

        store.put_block(&block).await.unwrap();
        let fetched = store.get_block(&block.hash()).await.unwrap().unwrap();
        assert_eq!(fetched.hash(), block.hash());
        assert_eq!(fetched.transactions().len(), 1);
        fetched.validate().unwrap();
    }

    #[tokio::test]
    async fn test_index_append_and_negative_offset() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let chain = ChainId::random();

        assert_eq!(store.append_index(&chain, digest(1)).await.unwrap(), 1);
        assert_eq!(store.append_index(&chain, digest(2)).await.unwrap(), 2);

        assert_eq!(
            store.index_block_hash(&chain, -1).await.unwrap(),
            Some(digest(2))
        );
        assert_eq!(
            store.index_block_hash(&chain, 0).await.unwrap(),
            Some(digest(1))
        );
        assert!(matches!(
            store.append_index(&chain, digest(2)).await,
            Err(StoreError::DuplicateAppend { .. })
        ));
    }

    #[tokio::test]
    async fn test_fork_index_copies_prefix() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let source = ChainId::random();
        let destination = ChainId::random();

        for byte in 1..=4u8 {
            store.append_index(&source, digest(byte)).await.unwrap();
        }
        store.fork_index(&source, &destination, 1).await.unwrap();

        assert_eq!(store.count_index(&destination).await.unwrap(), 2);
        assert_eq!(
            store.iterate_index(&destination, 0, None).await.unwrap(),
            vec![digest(1), digest(2)]
        );
    }

    #[tokio::test]
    async fn test_state_reference_queries() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let chain = ChainId::random();
        let address = addr(1);

        for index in [2u64, 4, 6] {
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
                .lookup_state_reference(&chain, &address, 5)
                .await
                .unwrap(),
            Some((digest(4), 4))
        );
        let descending = store
            .iterate_state_references(&chain, &address, None, None, Some(2))
            .await
            .unwrap();
        assert_eq!(descending, vec![(digest(6), 6), (digest(4), 4)]);

        let all = store
            .list_all_state_references(&chain, None, Some(4))
            .await
            .unwrap();
        assert_eq!(all.get(&address), Some(&vec![digest(2), digest(4)]));
    }

    #[tokio::test]
    async fn test_fork_state_references_strip() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let source = ChainId::random();
        let destination = ChainId::random();
        let stripped = addr(1);

        for index in [1u64, 5] {
            store
                .store_state_reference(
                    &source,
                    &BTreeSet::from([stripped]),
                    digest(index as u8),
                    index,
                )
                .await
                .unwrap();
        }
        store
            .fork_state_references(&source, &destination, 2, &BTreeSet::from([stripped]))
            .await
            .unwrap();

        assert_eq!(
            store
                .lookup_state_reference(&destination, &stripped, u64::MAX)
                .await
                .unwrap(),
            Some((digest(1), 1))
        );
    }

    #[tokio::test]
    async fn test_nonce_upsert() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let chain = ChainId::random();
        let address = addr(3);

        store.increase_tx_nonce(&chain, &address, 1).await.unwrap();
        store.increase_tx_nonce(&chain, &address, 2).await.unwrap();
        assert_eq!(store.get_tx_nonce(&chain, &address).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_canonical_pointer() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        assert_eq!(store.canonical_chain_id().await.unwrap(), None);

        let first = ChainId::random();
        let second = ChainId::random();
        store.set_canonical_chain_id(&first).await.unwrap();
        assert_eq!(store.canonical_chain_id().await.unwrap(), Some(first));

        store.set_canonical_chain_id(&second).await.unwrap();
        assert_eq!(store.canonical_chain_id().await.unwrap(), Some(second));

        store.delete_chain_id(&second).await.unwrap();
        assert_eq!(store.canonical_chain_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_states_roundtrip() {
        let store = SqliteStore::<Noop>::open_memory().unwrap();
        let hash = digest(9);
        let states =
            BTreeMap::from([(addr(1), Value::Text("a".into())), (addr(2), Value::Int(3))]);

        store.set_block_states(&hash, &states).await.unwrap();
        assert_eq!(store.get_block_states(&hash).await.unwrap(), Some(states));
    }
}
