//! Blocks: immutable, proof-of-work-sealed records of transactions.
//!
//! A block's hash is the SHA-256 of its canonical encoding including the
//! nonce; the pre-evaluation hash omits the nonce and seeds action
//! evaluation randomness. The hash must satisfy the Hashcash rule: read as a
//! big-endian integer it is below `2^256 / difficulty`.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::BTreeMap;

use crate::account::StateSnapshot;
use crate::action::{Action, ActionEvaluation};
use crate::cancel::CancelToken;
use crate::error::{BlockError, ValueError};
use crate::plain::{dict, expect_entry, Key, Value};
use crate::transaction::{decode_address, decode_timestamp, encode_timestamp, Transaction};
use crate::types::{Address, HashDigest};

/// Nonce candidates generated between cancellation polls while mining.
const MINE_POLL_INTERVAL: u32 = 1024;

/// An arbitrary-length proof-of-work witness.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Nonce(pub bytes::Bytes);

impl Nonce {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes::Bytes::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Whether `hash`, read as a big-endian 256-bit integer, is below
/// `2^256 / difficulty`.
///
/// Difficulties of 0 and 1 impose no constraint (their target does not fit
/// in 256 bits).
pub fn satisfies_difficulty(hash: &HashDigest, difficulty: u64) -> bool {
    if difficulty <= 1 {
        return true;
    }
    // Long division of 2^256 (a one followed by 32 zero bytes) by the
    // difficulty, producing the 32-byte target.
    let mut target = [0u8; 32];
    let mut remainder: u128 = 1;
    for byte in target.iter_mut() {
        let cur = remainder << 8;
        *byte = (cur / difficulty as u128) as u8;
        remainder = cur % difficulty as u128;
    }
    hash.as_bytes().as_slice() < target.as_slice()
}

/// An immutable block.
///
/// Constructed by [`Block::mine`] or decoded from a canonical encoding;
/// never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Block<A: Action> {
    index: u64,
    difficulty: u64,
    nonce: Nonce,
    miner: Option<Address>,
    previous_hash: Option<HashDigest>,
    timestamp: DateTime<Utc>,
    transactions: Vec<Transaction<A>>,
    pre_evaluation_hash: HashDigest,
    hash: HashDigest,
}

impl<A: Action> Block<A> {
    /// Search for a nonce sealing the given contents at `difficulty`.
    ///
    /// Transactions are put into canonical order first (ascending id, with
    /// each signer's nonces kept ascending). The search is deterministic for
    /// a given `seed`. Polls `cancel` periodically and fails with
    /// `MiningCanceled` once it is set.
    #[allow(clippy::too_many_arguments)]
    pub fn mine(
        index: u64,
        difficulty: u64,
        miner: Option<Address>,
        previous_hash: Option<HashDigest>,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction<A>>,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<Self, BlockError> {
        let transactions = canonical_order(transactions);
        let pre_evaluation_hash = HashDigest::digest(
            &header_value(
                index,
                difficulty,
                None,
                &miner,
                &previous_hash,
                &timestamp,
                &transactions,
            )
            .encode(),
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let mut attempts: u32 = 0;
        loop {
            if attempts % MINE_POLL_INTERVAL == 0 && cancel.is_canceled() {
                return Err(BlockError::MiningCanceled);
            }
            attempts = attempts.wrapping_add(1);

            let mut candidate = vec![0u8; 10];
            rng.fill_bytes(&mut candidate);
            let nonce = Nonce::from_bytes(candidate);

            let hash = HashDigest::digest(
                &header_value(
                    index,
                    difficulty,
                    Some(&nonce),
                    &miner,
                    &previous_hash,
                    &timestamp,
                    &transactions,
                )
                .encode(),
            );

            if satisfies_difficulty(&hash, difficulty) {
                return Ok(Self {
                    index,
                    difficulty,
                    nonce,
                    miner,
                    previous_hash,
                    timestamp,
                    transactions,
                    pre_evaluation_hash,
                    hash,
                });
            }
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn miner(&self) -> Option<Address> {
        self.miner
    }

    pub fn previous_hash(&self) -> Option<HashDigest> {
        self.previous_hash
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction<A>] {
        &self.transactions
    }

    pub fn pre_evaluation_hash(&self) -> HashDigest {
        self.pre_evaluation_hash
    }

    pub fn hash(&self) -> HashDigest {
        self.hash
    }

    /// Validate self-contained invariants.
    ///
    /// Checks the stored hashes against recomputation, the Hashcash rule,
    /// the difficulty/index relationship, and every transaction's
    /// structural invariants. Linkage to a previous block is checked
    /// separately by [`Block::validate_successor`]; timestamp bounds are
    /// policy rules and live in the chain's `BlockPolicy`.
    pub fn validate(&self) -> Result<(), BlockError> {
        let recomputed_pre = HashDigest::digest(
            &header_value(
                self.index,
                self.difficulty,
                None,
                &self.miner,
                &self.previous_hash,
                &self.timestamp,
                &self.transactions,
            )
            .encode(),
        );
        if recomputed_pre != self.pre_evaluation_hash {
            return Err(BlockError::InvalidPreEvaluationHash);
        }

        let recomputed = HashDigest::digest(
            &header_value(
                self.index,
                self.difficulty,
                Some(&self.nonce),
                &self.miner,
                &self.previous_hash,
                &self.timestamp,
                &self.transactions,
            )
            .encode(),
        );
        if recomputed != self.hash {
            return Err(BlockError::InvalidHash);
        }

        if self.index == 0 {
            if self.difficulty != 0 {
                return Err(BlockError::InvalidDifficulty {
                    difficulty: self.difficulty,
                });
            }
        } else if self.difficulty == 0 {
            return Err(BlockError::InvalidDifficulty { difficulty: 0 });
        }

        if !satisfies_difficulty(&self.hash, self.difficulty) {
            return Err(BlockError::InvalidNonce);
        }

        for tx in &self.transactions {
            tx.validate()?;
        }

        Ok(())
    }

    /// Validate linkage to the block this one claims to follow.
    pub fn validate_successor(&self, previous: Option<&Block<A>>) -> Result<(), BlockError> {
        match previous {
            None => {
                if self.index != 0 {
                    return Err(BlockError::InvalidIndex {
                        expected: 0,
                        actual: self.index,
                    });
                }
                if self.previous_hash.is_some() {
                    return Err(BlockError::InvalidPreviousHash {
                        expected: None,
                        actual: self.previous_hash,
                    });
                }
            }
            Some(prev) => {
                if self.index != prev.index() + 1 {
                    return Err(BlockError::InvalidIndex {
                        expected: prev.index() + 1,
                        actual: self.index,
                    });
                }
                if self.previous_hash != Some(prev.hash()) {
                    return Err(BlockError::InvalidPreviousHash {
                        expected: Some(prev.hash()),
                        actual: self.previous_hash,
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluate every action of every transaction in order.
    ///
    /// The output delta of action N is the input of action N+1 across the
    /// whole block. Each action's random stream is seeded from the
    /// pre-evaluation hash XORed with the action's ordinal.
    pub fn evaluate(&self, base: StateSnapshot) -> Vec<ActionEvaluation<A>> {
        let mut evaluations = Vec::new();
        let mut states = crate::account::AccountStateDelta::new(base);
        let mut ordinal: u64 = 0;

        for tx in &self.transactions {
            for action in tx.actions() {
                let evaluation = ActionEvaluation::run(
                    action,
                    tx.signer(),
                    self.miner,
                    self.index,
                    states,
                    self.evaluation_seed(ordinal),
                );
                states = evaluation.output.clone();
                evaluations.push(evaluation);
                ordinal += 1;
            }
        }

        evaluations
    }

    /// The random seed for the action at the given ordinal.
    pub fn evaluation_seed(&self, ordinal: u64) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.pre_evaluation_hash.as_bytes()[..8]);
        u64::from_be_bytes(prefix) ^ ordinal
    }

    /// The canonical plain-value encoding, including both hashes.
    pub fn to_plain_value(&self) -> Value {
        let mut entries = match header_value(
            self.index,
            self.difficulty,
            Some(&self.nonce),
            &self.miner,
            &self.previous_hash,
            &self.timestamp,
            &self.transactions,
        ) {
            Value::Dict(entries) => entries,
            _ => unreachable!("header_value always builds a dict"),
        };
        entries.insert(
            Key::text("hash"),
            Value::Bytes(self.hash.as_bytes().to_vec()),
        );
        entries.insert(
            Key::text("pre_evaluation_hash"),
            Value::Bytes(self.pre_evaluation_hash.as_bytes().to_vec()),
        );
        Value::Dict(entries)
    }

    /// Rebuild a block from its canonical encoding.
    ///
    /// The stored hashes are trusted here; [`Block::validate`] recomputes
    /// them.
    pub fn from_plain_value(value: &Value) -> Result<Self, BlockError> {
        let entries = value.as_dict().ok_or(ValueError::WrongType {
            field: "block",
            expected: "dict",
        })?;

        let index = expect_entry(entries, "index")?
            .as_int()
            .ok_or(ValueError::WrongType {
                field: "index",
                expected: "integer",
            })? as u64;
        let difficulty = expect_entry(entries, "difficulty")?
            .as_int()
            .ok_or(ValueError::WrongType {
                field: "difficulty",
                expected: "integer",
            })? as u64;
        let nonce = Nonce::from_bytes(
            expect_entry(entries, "nonce")?
                .as_bytes()
                .ok_or(ValueError::WrongType {
                    field: "nonce",
                    expected: "bytes",
                })?
                .to_vec(),
        );
        let miner = match expect_entry(entries, "miner")? {
            Value::Null => None,
            other => Some(decode_address(other, "miner").map_err(BlockError::Decoding)?),
        };
        let previous_hash = match expect_entry(entries, "previous_hash")? {
            Value::Null => None,
            other => Some(decode_digest(other, "previous_hash")?),
        };
        let timestamp =
            decode_timestamp(expect_entry(entries, "timestamp")?).map_err(BlockError::Decoding)?;

        let transactions = expect_entry(entries, "transactions")?
            .as_list()
            .ok_or(ValueError::WrongType {
                field: "transactions",
                expected: "list",
            })?
            .iter()
            .map(Transaction::from_plain_value)
            .collect::<Result<Vec<_>, _>>()?;

        let hash = decode_digest(expect_entry(entries, "hash")?, "hash")?;
        let pre_evaluation_hash = decode_digest(
            expect_entry(entries, "pre_evaluation_hash")?,
            "pre_evaluation_hash",
        )?;

        Ok(Self {
            index,
            difficulty,
            nonce,
            miner,
            previous_hash,
            timestamp,
            transactions,
            pre_evaluation_hash,
            hash,
        })
    }
}

/// Canonical intra-block transaction order.
///
/// Global order is ascending transaction id; each signer's transactions are
/// then redistributed over that signer's positions in ascending nonce order,
/// so per-signer nonce runs stay contiguous in declared order.
fn canonical_order<A: Action>(transactions: Vec<Transaction<A>>) -> Vec<Transaction<A>> {
    let mut by_id: Vec<Transaction<A>> = transactions;
    by_id.sort_by_key(|tx| tx.id());

    let mut per_signer: BTreeMap<Address, Vec<Transaction<A>>> = BTreeMap::new();
    for tx in &by_id {
        per_signer.entry(tx.signer()).or_default().push(tx.clone());
    }
    for group in per_signer.values_mut() {
        group.sort_by_key(|tx| tx.nonce());
        group.reverse(); // pop() yields ascending nonces
    }

    by_id
        .iter()
        .map(|slot| {
            per_signer
                .get_mut(&slot.signer())
                .and_then(Vec::pop)
                .expect("every slot has a transaction for its signer")
        })
        .collect()
}

fn header_value<A: Action>(
    index: u64,
    difficulty: u64,
    nonce: Option<&Nonce>,
    miner: &Option<Address>,
    previous_hash: &Option<HashDigest>,
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction<A>],
) -> Value {
    let mut entries: Vec<(Key, Value)> = vec![
        (Key::text("difficulty"), Value::Int(difficulty as i64)),
        (Key::text("index"), Value::Int(index as i64)),
        (
            Key::text("miner"),
            match miner {
                Some(address) => Value::Bytes(address.as_bytes().to_vec()),
                None => Value::Null,
            },
        ),
        (
            Key::text("previous_hash"),
            match previous_hash {
                Some(digest) => Value::Bytes(digest.as_bytes().to_vec()),
                None => Value::Null,
            },
        ),
        (Key::text("timestamp"), encode_timestamp(timestamp)),
        (
            Key::text("transactions"),
            Value::List(transactions.iter().map(Transaction::to_plain_value).collect()),
        ),
    ];
    if let Some(nonce) = nonce {
        entries.push((Key::text("nonce"), Value::Bytes(nonce.as_bytes().to_vec())));
    }
    dict(entries)
}

fn decode_digest(value: &Value, field: &'static str) -> Result<HashDigest, BlockError> {
    let bytes = value.as_bytes().ok_or(ValueError::WrongType {
        field,
        expected: "bytes",
    })?;
    HashDigest::try_from(bytes).map_err(|_| {
        BlockError::Decoding(ValueError::WrongType {
            field,
            expected: "32 bytes",
        })
    })
}
