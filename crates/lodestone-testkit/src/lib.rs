//! # Lodestone Testkit
//!
//! Testing utilities for the Lodestone blockchain engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a deterministic keypair + in-memory store, and
//!   [`TagAction`], an action that records its render/unrender calls so
//!   reorganization tests can assert ordering
//! - **Generators**: proptest strategies for property-based testing
//! - **Golden vectors**: fixed inputs whose canonical bytes, ids, and
//!   signatures must reproduce identically on every platform
//!
//! ## Test Fixtures
//!
//! ```rust
//! use lodestone_testkit::TestFixture;
//!
//! let fixture = TestFixture::with_seed([0x42; 32]);
//! let tx = fixture.make_transaction(0, "hello");
//! assert!(tx.validate().is_ok());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lodestone_testkit::generators::{transaction_from_params, TxParams};
//!
//! proptest! {
//!     #[test]
//!     fn tx_id_is_deterministic(params: TxParams) {
//!         let a = transaction_from_params(&params);
//!         let b = transaction_from_params(&params);
//!         prop_assert_eq!(a.id(), b.id());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    multi_party_fixtures, test_timestamp, RenderKind, RenderRecord, TagAction, TestFixture,
};
pub use generators::{transaction_from_params, TxParams};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
