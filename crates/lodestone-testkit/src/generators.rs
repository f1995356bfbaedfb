//! Proptest generators for property-based testing.

use proptest::prelude::*;
use std::collections::BTreeSet;

use lodestone_core::{
    Address, HashDigest, Key, PrivateKey, Transaction, TxId, Value,
};

use crate::fixtures::{test_timestamp, TagAction};

/// Generate a deterministic private key.
pub fn private_key() -> impl Strategy<Value = PrivateKey> {
    any::<[u8; 32]>().prop_map(|seed| PrivateKey::from_seed(&seed))
}

/// Generate a random address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

/// Generate a random hash digest.
pub fn hash_digest() -> impl Strategy<Value = HashDigest> {
    any::<[u8; 32]>().prop_map(HashDigest::from_bytes)
}

/// Generate a random transaction id.
pub fn tx_id() -> impl Strategy<Value = TxId> {
    any::<[u8; 32]>().prop_map(TxId::from_bytes)
}

/// Generate a short tag string.
pub fn tag() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

/// Generate an arbitrary plain value, up to a few levels deep.
pub fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        "[ -~]{0,16}".prop_map(Value::Text),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map(
                prop_oneof![
                    prop::collection::vec(any::<u8>(), 1..8).prop_map(Key::Bytes),
                    "[a-z]{1,8}".prop_map(Key::Text),
                ],
                inner,
                0..4
            )
            .prop_map(Value::Dict),
        ]
    })
}

/// Parameters for generating a signed transaction.
#[derive(Debug, Clone)]
pub struct TxParams {
    pub seed: [u8; 32],
    pub nonce: i64,
    pub target: Address,
    pub tag: String,
}

impl Arbitrary for TxParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<[u8; 32]>(), 0i64..=1000, address(), tag())
            .prop_map(|(seed, nonce, target, tag)| TxParams {
                seed,
                nonce,
                target,
                tag,
            })
            .boxed()
    }
}

/// Build a signed transaction from parameters.
pub fn transaction_from_params(params: &TxParams) -> Transaction<TagAction> {
    let key = PrivateKey::from_seed(&params.seed);
    Transaction::new(
        &key,
        params.nonce,
        BTreeSet::from([params.target]),
        test_timestamp(),
        vec![TagAction::new(params.target, &params.tag)],
    )
    .expect("generated transaction must sign")
}
