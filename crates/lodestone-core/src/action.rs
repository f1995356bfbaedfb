//! The pluggable action interface and its evaluation record.
//!
//! Actions are user code applied to a state view. The engine is parameterized
//! by the [`Action`] trait; it never inspects an action beyond this surface.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

use crate::account::AccountStateDelta;
use crate::error::{ActionError, ValueError};
use crate::plain::Value;
use crate::types::Address;

/// User code evaluated against a state view to produce a state delta.
///
/// `execute` must be deterministic: the only randomness available is the
/// seeded stream in [`ActionContext::random`]. Rendering methods are
/// side-effecting observers and must not touch chain state.
pub trait Action: Clone + fmt::Debug + Send + Sync + 'static {
    /// Apply the action to `context.previous_states`, returning the output
    /// delta.
    fn execute(&self, context: &ActionContext) -> Result<AccountStateDelta, ActionError>;

    /// Called when this action enters the canonical chain.
    fn render(&self, _context: &ActionContext, _output: &AccountStateDelta) {}

    /// Called when this action leaves the canonical chain.
    fn unrender(&self, _context: &ActionContext, _output: &AccountStateDelta) {}

    /// Called instead of `render` when the action's execution had failed.
    fn render_error(&self, _context: &ActionContext, _error: &ActionError) {}

    /// Called instead of `unrender` when the action's execution had failed.
    fn unrender_error(&self, _context: &ActionContext, _error: &ActionError) {}

    /// Serialize to a plain value.
    fn plain_value(&self) -> Value;

    /// Deserialize from a plain value.
    fn load_plain_value(value: &Value) -> Result<Self, ValueError>
    where
        Self: Sized;
}

/// Evaluation context handed to [`Action::execute`].
#[derive(Clone, Debug)]
pub struct ActionContext {
    /// The transaction signer (or the miner, for a policy block action).
    pub signer: Address,
    /// The miner of the containing block, if any.
    pub miner: Option<Address>,
    /// The index of the containing block.
    pub block_index: u64,
    /// Whether this is a rehearsal run (transaction validation), where
    /// state reads resolve against an empty snapshot.
    pub rehearsal: bool,
    /// The state view the action executes against.
    pub previous_states: AccountStateDelta,
    seed: u64,
}

impl ActionContext {
    pub fn new(
        signer: Address,
        miner: Option<Address>,
        block_index: u64,
        rehearsal: bool,
        previous_states: AccountStateDelta,
        seed: u64,
    ) -> Self {
        Self {
            signer,
            miner,
            block_index,
            rehearsal,
            previous_states,
            seed,
        }
    }

    /// A deterministic pseudo-random stream.
    ///
    /// Seeded from the containing block's pre-evaluation hash XORed with the
    /// action's ordinal, so every action gets an independent but
    /// reproducible stream.
    pub fn random(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// The seed behind [`Self::random`].
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// The outcome of evaluating one action.
///
/// Carries everything needed to persist the state delta and to fire
/// `render`/`unrender` later without re-deriving context.
#[derive(Clone, Debug)]
pub struct ActionEvaluation<A: Action> {
    pub action: A,
    pub signer: Address,
    pub miner: Option<Address>,
    pub block_index: u64,
    pub seed: u64,
    /// The state view the action executed against.
    pub input: AccountStateDelta,
    /// The state view after execution. Equal to `input` when execution
    /// failed.
    pub output: AccountStateDelta,
    pub error: Option<ActionError>,
}

impl<A: Action> ActionEvaluation<A> {
    /// Run one action against `input`, capturing failure instead of
    /// propagating it.
    pub fn run(
        action: &A,
        signer: Address,
        miner: Option<Address>,
        block_index: u64,
        input: AccountStateDelta,
        seed: u64,
    ) -> Self {
        let context = ActionContext::new(signer, miner, block_index, false, input.clone(), seed);
        match action.execute(&context) {
            Ok(output) => Self {
                action: action.clone(),
                signer,
                miner,
                block_index,
                seed,
                input,
                output,
                error: None,
            },
            Err(error) => Self {
                action: action.clone(),
                signer,
                miner,
                block_index,
                seed,
                output: input.clone(),
                input,
                error: Some(error),
            },
        }
    }

    /// Rebuild the context this evaluation ran under.
    pub fn context(&self) -> ActionContext {
        ActionContext::new(
            self.signer,
            self.miner,
            self.block_index,
            false,
            self.input.clone(),
            self.seed,
        )
    }

    /// Notify the action that it entered the canonical chain.
    ///
    /// Routes to `render_error` when the execution had failed. Rendering
    /// never affects chain state.
    pub fn render(&self) {
        let context = self.context();
        match &self.error {
            None => self.action.render(&context, &self.output),
            Some(error) => self.action.render_error(&context, error),
        }
    }

    /// Notify the action that it left the canonical chain.
    pub fn unrender(&self) {
        let context = self.context();
        match &self.error {
            None => self.action.unrender(&context, &self.output),
            Some(error) => self.action.unrender_error(&context, error),
        }
    }
}
