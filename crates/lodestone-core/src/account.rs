//! Account state views and deltas.
//!
//! An [`AccountStateDelta`] is a copy-on-write view over a base snapshot:
//! reads fall through to the snapshot, writes accumulate in the delta. Action
//! evaluation chains deltas so that the output of action N becomes the input
//! of action N+1 across a whole block.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::crypto::keccak256;
use crate::error::ActionError;
use crate::plain::Value;
use crate::types::Address;

/// A fungible asset denomination, identified by its ticker.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Currency {
    pub ticker: String,
}

impl Currency {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
        }
    }

    /// The derived account holding `owner`'s balance of this currency.
    ///
    /// Balances live as ordinary state under this address so that balance
    /// mutations flow through the same snapshot and state-reference
    /// machinery as plain state writes.
    pub fn fungible_account(&self, owner: &Address) -> Address {
        let mut material = Vec::with_capacity(20 + self.ticker.len());
        material.extend_from_slice(owner.as_bytes());
        material.extend_from_slice(self.ticker.as_bytes());
        let hash = keccak256(&material);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..]);
        Address(addr)
    }
}

/// The base snapshot a delta reads through to.
pub type StateSnapshot = Arc<BTreeMap<Address, Value>>;

/// A copy-on-write account state view.
///
/// Reads consult pending writes first, then the base snapshot. All mutating
/// operations consume and return the delta, so evaluation code threads one
/// delta through an action sequence.
#[derive(Clone, Debug)]
pub struct AccountStateDelta {
    base: StateSnapshot,
    updated: BTreeMap<Address, Value>,
    touched: BTreeSet<Address>,
}

impl AccountStateDelta {
    /// Create a delta over a base snapshot.
    pub fn new(base: StateSnapshot) -> Self {
        Self {
            base,
            updated: BTreeMap::new(),
            touched: BTreeSet::new(),
        }
    }

    /// An empty delta with no base state.
    pub fn empty() -> Self {
        Self::new(Arc::new(BTreeMap::new()))
    }

    /// Read the state of an address.
    pub fn get_state(&self, address: &Address) -> Option<&Value> {
        self.updated.get(address).or_else(|| self.base.get(address))
    }

    /// Write the state of an address.
    pub fn set_state(mut self, address: Address, value: Value) -> Self {
        self.touched.insert(address);
        self.updated.insert(address, value);
        self
    }

    /// The balance of `owner` in `currency`. Missing state reads as zero.
    pub fn get_balance(&self, owner: &Address, currency: &Currency) -> i64 {
        let account = currency.fungible_account(owner);
        self.get_state(&account)
            .and_then(Value::as_int)
            .unwrap_or(0)
    }

    /// Mint `amount` of `currency` into `owner`'s balance.
    pub fn mint_asset(
        mut self,
        owner: Address,
        currency: &Currency,
        amount: i64,
    ) -> Result<Self, ActionError> {
        if amount <= 0 {
            return Err(ActionError::NonPositiveAmount(amount));
        }
        let balance = self.get_balance(&owner, currency);
        self = self.set_balance(owner, currency, balance + amount);
        Ok(self)
    }

    /// Move `amount` of `currency` from `sender` to `recipient`.
    pub fn transfer_asset(
        mut self,
        sender: Address,
        recipient: Address,
        currency: &Currency,
        amount: i64,
    ) -> Result<Self, ActionError> {
        if amount <= 0 {
            return Err(ActionError::NonPositiveAmount(amount));
        }
        let available = self.get_balance(&sender, currency);
        if available < amount {
            return Err(ActionError::InsufficientBalance {
                owner: sender,
                ticker: currency.ticker.clone(),
                available,
                required: amount,
            });
        }
        let recipient_balance = self.get_balance(&recipient, currency);
        self = self.set_balance(sender, currency, available - amount);
        self = self.set_balance(recipient, currency, recipient_balance + amount);
        Ok(self)
    }

    /// Burn `amount` of `currency` from `owner`'s balance.
    pub fn burn_asset(
        mut self,
        owner: Address,
        currency: &Currency,
        amount: i64,
    ) -> Result<Self, ActionError> {
        if amount <= 0 {
            return Err(ActionError::NonPositiveAmount(amount));
        }
        let available = self.get_balance(&owner, currency);
        if available < amount {
            return Err(ActionError::InsufficientBalance {
                owner,
                ticker: currency.ticker.clone(),
                available,
                required: amount,
            });
        }
        self = self.set_balance(owner, currency, available - amount);
        Ok(self)
    }

    fn set_balance(mut self, owner: Address, currency: &Currency, balance: i64) -> Self {
        let account = currency.fungible_account(&owner);
        self.touched.insert(owner);
        self.touched.insert(account);
        self.updated.insert(account, Value::Int(balance));
        self
    }

    /// Every address touched by this delta, including owners of balance
    /// mutations.
    pub fn updated_addresses(&self) -> BTreeSet<Address> {
        self.touched
            .iter()
            .chain(self.updated.keys())
            .copied()
            .collect()
    }

    /// Addresses whose stored state was written (plain writes and derived
    /// fungible accounts).
    pub fn state_updated_addresses(&self) -> BTreeSet<Address> {
        self.updated.keys().copied().collect()
    }

    /// The accumulated writes, as a map suitable for a per-block snapshot.
    pub fn updated_states(&self) -> BTreeMap<Address, Value> {
        self.updated.clone()
    }

    /// The base snapshot this delta reads through to.
    pub fn base(&self) -> StateSnapshot {
        Arc::clone(&self.base)
    }
}
