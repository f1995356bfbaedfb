//! Golden vectors for cross-run verification of canonical encoding.
//!
//! Every build must produce identical canonical bytes, transaction ids, and
//! signatures for these fixed inputs. The vectors are generated rather than
//! hard-coded so `verify_all_vectors` can hold on any platform; dump them
//! with [`vectors_json`] to pin an external reference.

use serde::{Deserialize, Serialize};

use lodestone_core::{Address, PrivateKey, Transaction, Value};

use crate::fixtures::{test_timestamp, TagAction};
use std::collections::BTreeSet;

/// A single golden test vector.
#[derive(Debug, Serialize, Deserialize)]
pub struct GoldenVector {
    pub name: String,
    pub description: String,

    // Inputs
    pub signer_seed: String, // 32 bytes hex
    pub nonce: i64,
    pub target: String, // 20 bytes hex
    pub tag: String,

    // Derived outputs
    pub signer: String,        // 20 bytes hex
    pub canonical_bytes: String,
    pub signature: String, // 64 bytes hex
    pub tx_id: String,     // 32 bytes hex
}

fn generate_vector(
    name: &str,
    description: &str,
    seed: [u8; 32],
    nonce: i64,
    target: Address,
    tag: &str,
) -> GoldenVector {
    let key = PrivateKey::from_seed(&seed);
    let tx = Transaction::new(
        &key,
        nonce,
        BTreeSet::from([target]),
        test_timestamp(),
        vec![TagAction::new(target, tag)],
    )
    .expect("golden vector transaction must sign");

    GoldenVector {
        name: name.to_string(),
        description: description.to_string(),
        signer_seed: hex::encode(seed),
        nonce,
        target: target.to_hex(),
        tag: tag.to_string(),
        signer: tx.signer().to_hex(),
        canonical_bytes: hex::encode(tx.to_plain_value().encode()),
        signature: tx.signature().to_hex(),
        tx_id: tx.id().to_hex(),
    }
}

/// Generate all golden vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        generate_vector(
            "self_tag",
            "Signer tags its own address",
            [0x01; 32],
            0,
            PrivateKey::from_seed(&[0x01; 32]).to_address(),
            "genesis-note",
        ),
        generate_vector(
            "foreign_target",
            "Signer tags a fixed foreign address",
            [0x02; 32],
            0,
            Address::from_bytes([0xaa; 20]),
            "foreign",
        ),
        generate_vector(
            "high_nonce",
            "Nonce far above zero",
            [0x03; 32],
            977,
            Address::from_bytes([0x11; 20]),
            "late",
        ),
        generate_vector(
            "empty_tag",
            "Zero-length tag payload",
            [0x04; 32],
            1,
            Address::from_bytes([0x00; 20]),
            "",
        ),
        generate_vector(
            "long_tag",
            "Tag at a generous length",
            [0x05; 32],
            2,
            Address::from_bytes([0xfe; 20]),
            "a-rather-long-tag-body-for-the-encoder-to-chew-on",
        ),
    ]
}

/// Check every vector: regeneration is identical, the canonical bytes
/// decode back to an equal transaction, and the signature verifies.
pub fn verify_all_vectors() -> Result<(), String> {
    for vector in all_vectors() {
        let seed: [u8; 32] = hex::decode(&vector.signer_seed)
            .map_err(|e| e.to_string())?
            .try_into()
            .map_err(|_| "seed must be 32 bytes".to_string())?;
        let target =
            Address::from_hex(&vector.target).map_err(|e| format!("{}: {e}", vector.name))?;

        let regenerated = generate_vector(
            &vector.name,
            &vector.description,
            seed,
            vector.nonce,
            target,
            &vector.tag,
        );
        if regenerated.canonical_bytes != vector.canonical_bytes
            || regenerated.signature != vector.signature
            || regenerated.tx_id != vector.tx_id
        {
            return Err(format!("vector {} is not reproducible", vector.name));
        }

        let bytes = hex::decode(&vector.canonical_bytes).map_err(|e| e.to_string())?;
        let decoded = Transaction::<TagAction>::from_plain_value(
            &Value::decode(&bytes).map_err(|e| format!("{}: {e}", vector.name))?,
        )
        .map_err(|e| format!("{}: {e}", vector.name))?;
        if decoded.id().to_hex() != vector.tx_id {
            return Err(format!("vector {}: decoded id differs", vector.name));
        }
        decoded
            .validate()
            .map_err(|e| format!("{}: {e}", vector.name))?;
    }
    Ok(())
}

/// The vectors as pretty JSON, for pinning an external reference file.
pub fn vectors_json() -> String {
    serde_json::to_string_pretty(&all_vectors()).expect("vectors serialize to JSON")
}
