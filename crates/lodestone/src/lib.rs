//! # Lodestone
//!
//! The Lodestone blockchain engine: a library surface (no CLI) that
//! maintains a canonical ordered chain of cryptographically linked blocks,
//! evaluates pluggable actions to derive per-address state, indexes state
//! changes so historical state at any block is retrievable, and performs
//! chain reorganization when a stronger chain is discovered.
//!
//! ## Key Types
//!
//! - [`BlockChain`] - The engine: append, validate, mine, query, fork, swap
//! - [`BlockPolicy`] - Pluggable difficulty and validation rules
//! - [`ChainError`] - The engine's error surface
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lodestone::{BlockChain, NullPolicy};
//! use lodestone_core::{CancelToken, PrivateKey};
//! use lodestone_store::MemoryStore;
//! # use lodestone_core::{AccountStateDelta, Action, ActionContext, ActionError, Value, ValueError};
//! # #[derive(Clone, Debug)]
//! # struct MyAction;
//! # impl Action for MyAction {
//! #     fn execute(&self, ctx: &ActionContext) -> Result<AccountStateDelta, ActionError> {
//! #         Ok(ctx.previous_states.clone())
//! #     }
//! #     fn plain_value(&self) -> Value { Value::Null }
//! #     fn load_plain_value(_: &Value) -> Result<Self, ValueError> { Ok(MyAction) }
//! # }
//!
//! async fn example() {
//!     let store = MemoryStore::<MyAction>::new();
//!     let chain = BlockChain::new(store, NullPolicy::new(16)).await.unwrap();
//!
//!     let miner = PrivateKey::generate();
//!     let block = chain
//!         .mine_block(miner.to_address(), chrono::Utc::now(), &CancelToken::new())
//!         .await
//!         .unwrap();
//!     assert_eq!(block.index(), 0);
//! }
//! ```

pub mod chain;
pub mod error;
pub mod policy;

pub use chain::BlockChain;
pub use error::{ChainError, Result};
pub use policy::{BlockPolicy, NullPolicy, StandardPolicy};
