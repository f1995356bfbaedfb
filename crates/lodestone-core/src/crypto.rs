//! Cryptographic primitives for Lodestone.
//!
//! Wraps secp256k1 ECDSA signing, SHA-256 hashing, and Keccak-256 address
//! derivation with strong types.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Address, HashDigest};

impl HashDigest {
    /// Compute the SHA-256 digest of the given data.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }
}

/// Compute the Keccak-256 digest of the given data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A secp256k1 public key (stored compressed, 33 bytes on the wire).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse from SEC1 bytes (compressed or uncompressed).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Derive the account address.
    ///
    /// Keccak-256 of the uncompressed SEC1 encoding without its leading tag
    /// byte, taking the last 20 bytes.
    pub fn to_address(&self) -> Address {
        let uncompressed = self.0.to_encoded_point(false);
        let hash = keccak256(&uncompressed.as_bytes()[1..]);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..]);
        Address(addr)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = k256::ecdsa::Signature::from_slice(&signature.0)
            .map_err(|_| CryptoError::MalformedSignature)?;
        self.0
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &hex::encode(self.to_bytes())[..16])
    }
}

/// A 64-byte secp256k1 ECDSA signature (fixed r ‖ s encoding).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The zero signature (invalid, used as a placeholder).
    pub const ZERO: Self = Self([0u8; 64]);
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 64] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// A secp256k1 private key for signing transactions and mining blocks.
#[derive(Clone)]
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    /// Generate a new random private key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        Self { signing_key }
    }

    /// Create from raw scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|signing_key| Self { signing_key })
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Derive a key deterministically from a 32-byte seed.
    ///
    /// The seed is hashed (and re-hashed with a counter if the digest falls
    /// outside the curve order) until a valid scalar appears, so any seed
    /// yields the same key on every platform.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut counter: u32 = 0;
        loop {
            let mut material = Vec::with_capacity(36);
            material.extend_from_slice(seed);
            material.extend_from_slice(&counter.to_be_bytes());
            let candidate = HashDigest::digest(&material);
            if let Ok(key) = Self::from_bytes(candidate.as_bytes()) {
                return key;
            }
            counter += 1;
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.signing_key.verifying_key())
    }

    /// The address of this key's public half.
    pub fn to_address(&self) -> Address {
        self.public_key().to_address()
    }

    /// Sign a message (RFC 6979 deterministic ECDSA over SHA-256).
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: k256::ecdsa::Signature = self.signing_key.sign(message);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&sig.to_bytes());
        Signature(bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({:?})", self.to_address())
    }
}
