//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a deterministic keypair plus an
//! in-memory store, and [`TagAction`], a minimal action that records its
//! render and unrender calls for reorganization tests.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;

use lodestone_core::{
    AccountStateDelta, Action, ActionContext, ActionError, Address, PrivateKey, Transaction,
    Value, ValueError,
};
use lodestone_core::plain::{dict, expect_entry, Key};
use lodestone_store::MemoryStore;

/// Whether a render record came from `render` or `unrender`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderKind {
    Render,
    Unrender,
}

/// One observed render or unrender call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderRecord {
    pub kind: RenderKind,
    pub tag: String,
    pub block_index: u64,
}

static RENDER_LOG: Mutex<Vec<RenderRecord>> = Mutex::new(Vec::new());

/// An action that writes a text tag under a target address.
///
/// Every render/unrender call is appended to a process-wide log so tests
/// can assert ordering across reorganizations. Tests sharing a process
/// should namespace their tags and filter [`TagAction::render_log`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagAction {
    pub target: Address,
    pub tag: String,
}

impl TagAction {
    pub fn new(target: Address, tag: &str) -> Self {
        Self {
            target,
            tag: tag.to_string(),
        }
    }

    /// A copy of the process-wide render log.
    pub fn render_log() -> Vec<RenderRecord> {
        RENDER_LOG.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Clear the process-wide render log.
    pub fn clear_render_log() {
        RENDER_LOG
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, kind: RenderKind, block_index: u64) {
        RENDER_LOG
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RenderRecord {
                kind,
                tag: self.tag.clone(),
                block_index,
            });
    }
}

impl Action for TagAction {
    fn execute(&self, context: &ActionContext) -> Result<AccountStateDelta, ActionError> {
        Ok(context
            .previous_states
            .clone()
            .set_state(self.target, Value::Text(self.tag.clone())))
    }

    fn render(&self, context: &ActionContext, _output: &AccountStateDelta) {
        self.record(RenderKind::Render, context.block_index);
    }

    fn unrender(&self, context: &ActionContext, _output: &AccountStateDelta) {
        self.record(RenderKind::Unrender, context.block_index);
    }

    fn plain_value(&self) -> Value {
        dict([
            (
                Key::text("target"),
                Value::Bytes(self.target.as_bytes().to_vec()),
            ),
            (Key::text("tag"), Value::Text(self.tag.clone())),
        ])
    }

    fn load_plain_value(value: &Value) -> Result<Self, ValueError> {
        let entries = value.as_dict().ok_or(ValueError::WrongType {
            field: "action",
            expected: "dict",
        })?;
        let target_bytes = expect_entry(entries, "target")?
            .as_bytes()
            .ok_or(ValueError::WrongType {
                field: "target",
                expected: "bytes",
            })?;
        let target = Address::try_from(target_bytes).map_err(|_| ValueError::WrongType {
            field: "target",
            expected: "20 bytes",
        })?;
        let tag = expect_entry(entries, "tag")?
            .as_text()
            .ok_or(ValueError::WrongType {
                field: "tag",
                expected: "text",
            })?
            .to_string();
        Ok(Self { target, tag })
    }
}

/// A fixed timestamp for deterministic test data.
pub fn test_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

/// A test fixture with a keypair and memory store.
pub struct TestFixture {
    pub key: PrivateKey,
    pub store: MemoryStore<TagAction>,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            key: PrivateKey::generate(),
            store: MemoryStore::new(),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            key: PrivateKey::from_seed(&seed),
            store: MemoryStore::new(),
        }
    }

    /// The fixture key's address.
    pub fn address(&self) -> Address {
        self.key.to_address()
    }

    /// A signed transaction tagging the fixture's own address.
    pub fn make_transaction(&self, nonce: i64, tag: &str) -> Transaction<TagAction> {
        self.make_tagging(nonce, self.address(), tag)
    }

    /// A signed transaction tagging an arbitrary target address.
    pub fn make_tagging(
        &self,
        nonce: i64,
        target: Address,
        tag: &str,
    ) -> Transaction<TagAction> {
        Transaction::new(
            &self.key,
            nonce,
            BTreeSet::from([target]),
            test_timestamp(),
            vec![TagAction::new(target, tag)],
        )
        .expect("fixture transaction must sign")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0xf1;
            TestFixture::with_seed(seed)
        })
        .collect()
}
