//! Transactions: signed, ordered action lists with a per-signer nonce.
//!
//! A transaction is immutable once signed. Its id is the SHA-256 of its
//! canonical encoding, so equal content means equal id on every platform.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;

use crate::account::AccountStateDelta;
use crate::action::{Action, ActionContext};
use crate::crypto::{PrivateKey, PublicKey, Signature};
use crate::error::{TxError, ValueError};
use crate::plain::{dict, expect_entry, Key, Value};
use crate::types::{Address, HashDigest, TxId};

/// A signed, ordered list of actions with a nonce per signer.
#[derive(Clone, Debug)]
pub struct Transaction<A: Action> {
    id: TxId,
    nonce: i64,
    signer: Address,
    public_key: PublicKey,
    updated_addresses: BTreeSet<Address>,
    timestamp: DateTime<Utc>,
    actions: Vec<A>,
    signature: Signature,
}

impl<A: Action> Transaction<A> {
    /// Build and sign a transaction.
    ///
    /// The signature covers the canonical encoding of every other field;
    /// the id covers the signed encoding.
    pub fn new(
        private_key: &PrivateKey,
        nonce: i64,
        updated_addresses: BTreeSet<Address>,
        timestamp: DateTime<Utc>,
        actions: Vec<A>,
    ) -> Result<Self, TxError> {
        if nonce < 0 {
            return Err(TxError::NegativeNonce(nonce));
        }
        let public_key = private_key.public_key();
        let signer = public_key.to_address();

        let unsigned = unsigned_value(
            nonce,
            &signer,
            &public_key,
            &updated_addresses,
            &timestamp,
            &actions,
        );
        let signature = private_key.sign(&unsigned.encode());

        let mut tx = Self {
            id: TxId::from_bytes([0u8; 32]),
            nonce,
            signer,
            public_key,
            updated_addresses,
            timestamp,
            actions,
            signature,
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    /// The transaction id.
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn nonce(&self) -> i64 {
        self.nonce
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn updated_addresses(&self) -> &BTreeSet<Address> {
        &self.updated_addresses
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actions(&self) -> &[A] {
        &self.actions
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Validate structural invariants and the signature.
    ///
    /// Also rehearses every action against an empty state view and rejects
    /// the transaction if a rehearsed write lands outside the declared
    /// updated addresses. An action that fails in rehearsal writes nothing
    /// and passes the check.
    pub fn validate(&self) -> Result<(), TxError> {
        if self.nonce < 0 {
            return Err(TxError::NegativeNonce(self.nonce));
        }

        let derived = self.public_key.to_address();
        if derived != self.signer {
            return Err(TxError::SignerMismatch {
                signer: self.signer,
                derived,
            });
        }

        let unsigned = unsigned_value(
            self.nonce,
            &self.signer,
            &self.public_key,
            &self.updated_addresses,
            &self.timestamp,
            &self.actions,
        );
        self.public_key
            .verify(&unsigned.encode(), &self.signature)
            .map_err(|_| TxError::InvalidSignature)?;

        let mut rehearsal_states = AccountStateDelta::empty();
        for (ordinal, action) in self.actions.iter().enumerate() {
            let context = ActionContext::new(
                self.signer,
                None,
                0,
                true,
                rehearsal_states.clone(),
                ordinal as u64,
            );
            if let Ok(output) = action.execute(&context) {
                for address in output.updated_addresses() {
                    if !self.updated_addresses.contains(&address) {
                        return Err(TxError::InvalidUpdatedAddresses { address });
                    }
                }
                rehearsal_states = output;
            }
        }

        Ok(())
    }

    /// The canonical plain-value encoding, including the signature.
    pub fn to_plain_value(&self) -> Value {
        let mut entries = match unsigned_value(
            self.nonce,
            &self.signer,
            &self.public_key,
            &self.updated_addresses,
            &self.timestamp,
            &self.actions,
        ) {
            Value::Dict(entries) => entries,
            _ => unreachable!("unsigned_value always builds a dict"),
        };
        entries.insert(
            Key::text("signature"),
            Value::Bytes(self.signature.as_bytes().to_vec()),
        );
        Value::Dict(entries)
    }

    /// Rebuild a transaction from its canonical encoding.
    pub fn from_plain_value(value: &Value) -> Result<Self, TxError> {
        let entries = value.as_dict().ok_or(ValueError::WrongType {
            field: "transaction",
            expected: "dict",
        })?;

        let nonce = expect_entry(entries, "nonce")?
            .as_int()
            .ok_or(ValueError::WrongType {
                field: "nonce",
                expected: "integer",
            })?;
        let signer = decode_address(expect_entry(entries, "signer")?, "signer")?;
        let public_key_bytes =
            expect_entry(entries, "public_key")?
                .as_bytes()
                .ok_or(ValueError::WrongType {
                    field: "public_key",
                    expected: "bytes",
                })?;
        let public_key = PublicKey::from_bytes(public_key_bytes)?;
        let timestamp = decode_timestamp(expect_entry(entries, "timestamp")?)?;

        let updated_addresses = expect_entry(entries, "updated_addresses")?
            .as_list()
            .ok_or(ValueError::WrongType {
                field: "updated_addresses",
                expected: "list",
            })?
            .iter()
            .map(|item| decode_address(item, "updated_addresses"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let actions = expect_entry(entries, "actions")?
            .as_list()
            .ok_or(ValueError::WrongType {
                field: "actions",
                expected: "list",
            })?
            .iter()
            .map(A::load_plain_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(TxError::Decoding)?;

        let signature_bytes =
            expect_entry(entries, "signature")?
                .as_bytes()
                .ok_or(ValueError::WrongType {
                    field: "signature",
                    expected: "bytes",
                })?;
        let signature = Signature::try_from(signature_bytes).map_err(|_| ValueError::WrongType {
            field: "signature",
            expected: "64 bytes",
        })?;

        let mut tx = Self {
            id: TxId::from_bytes([0u8; 32]),
            nonce,
            signer,
            public_key,
            updated_addresses,
            timestamp,
            actions,
            signature,
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    fn compute_id(&self) -> TxId {
        TxId(HashDigest::digest(&self.to_plain_value().encode()).0)
    }
}

fn unsigned_value<A: Action>(
    nonce: i64,
    signer: &Address,
    public_key: &PublicKey,
    updated_addresses: &BTreeSet<Address>,
    timestamp: &DateTime<Utc>,
    actions: &[A],
) -> Value {
    dict([
        (
            Key::text("actions"),
            Value::List(actions.iter().map(Action::plain_value).collect()),
        ),
        (Key::text("nonce"), Value::Int(nonce)),
        (
            Key::text("public_key"),
            Value::Bytes(public_key.to_bytes()),
        ),
        (
            Key::text("signer"),
            Value::Bytes(signer.as_bytes().to_vec()),
        ),
        (Key::text("timestamp"), encode_timestamp(timestamp)),
        (
            Key::text("updated_addresses"),
            Value::List(
                updated_addresses
                    .iter()
                    .map(|a| Value::Bytes(a.as_bytes().to_vec()))
                    .collect(),
            ),
        ),
    ])
}

pub(crate) fn encode_timestamp(timestamp: &DateTime<Utc>) -> Value {
    Value::Text(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub(crate) fn decode_timestamp(value: &Value) -> Result<DateTime<Utc>, ValueError> {
    let text = value.as_text().ok_or(ValueError::WrongType {
        field: "timestamp",
        expected: "text",
    })?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValueError::WrongType {
            field: "timestamp",
            expected: "RFC 3339 text",
        })
}

pub(crate) fn decode_address(value: &Value, field: &'static str) -> Result<Address, ValueError> {
    let bytes = value.as_bytes().ok_or(ValueError::WrongType {
        field,
        expected: "bytes",
    })?;
    Address::try_from(bytes).map_err(|_| ValueError::WrongType {
        field,
        expected: "20 bytes",
    })
}
