//! Consensus policy: difficulty schedules and per-block validation rules.
//!
//! The engine defers mining policy to a [`BlockPolicy`]. Policies see the
//! chain through block values handed to them (the tip and its parent),
//! never through a chain handle, keeping ownership one-way. Timestamp
//! bounds are policy rules: the permitted clock skew in either direction
//! belongs to the policy, not to the block itself.

use chrono::{DateTime, Duration, Utc};

use lodestone_core::{Action, Block, BlockError};

/// Mining and validation policy for a chain.
pub trait BlockPolicy<A: Action>: Send + Sync {
    /// An implicit action evaluated after every block's transactions with
    /// the miner as signer, or `None` for no block action.
    fn block_action(&self) -> Option<A> {
        None
    }

    /// The difficulty the next block must be mined at, given the current
    /// tip and the tip's parent.
    fn next_difficulty(&self, tip: Option<&Block<A>>, parent: Option<&Block<A>>) -> u64;

    /// Policy rules for a block about to extend the chain. Structural
    /// validation (hashes, proof of work, linkage) happens in the engine;
    /// this hook adds policy-level rules such as difficulty bounds and
    /// timestamp windows.
    fn validate_next_block(
        &self,
        tip: Option<&Block<A>>,
        next: &Block<A>,
        now: DateTime<Utc>,
    ) -> Result<(), BlockError>;

    /// Validate a contiguous run of blocks, e.g. one received from a peer.
    fn validate_blocks(&self, blocks: &[Block<A>], now: DateTime<Utc>) -> Result<(), BlockError> {
        let mut previous: Option<&Block<A>> = None;
        for block in blocks {
            block.validate()?;
            block.validate_successor(previous)?;
            self.validate_next_block(previous, block, now)?;
            previous = Some(block);
        }
        Ok(())
    }
}

/// A fixed-difficulty policy, mainly for tests.
///
/// The genesis block is mined at difficulty 0, every later block at the
/// configured difficulty. Timestamps are not constrained.
pub struct NullPolicy<A: Action> {
    difficulty: u64,
    block_action: Option<A>,
}

impl<A: Action> NullPolicy<A> {
    pub fn new(difficulty: u64) -> Self {
        Self {
            difficulty,
            block_action: None,
        }
    }

    /// Attach an implicit block action.
    pub fn with_block_action(difficulty: u64, action: A) -> Self {
        Self {
            difficulty,
            block_action: Some(action),
        }
    }
}

impl<A: Action> BlockPolicy<A> for NullPolicy<A> {
    fn block_action(&self) -> Option<A> {
        self.block_action.clone()
    }

    fn next_difficulty(&self, tip: Option<&Block<A>>, _parent: Option<&Block<A>>) -> u64 {
        if tip.is_none() {
            0
        } else {
            self.difficulty
        }
    }

    fn validate_next_block(
        &self,
        tip: Option<&Block<A>>,
        next: &Block<A>,
        _now: DateTime<Utc>,
    ) -> Result<(), BlockError> {
        let expected = self.next_difficulty(tip, None);
        if next.difficulty() != expected {
            return Err(BlockError::InvalidDifficulty {
                difficulty: next.difficulty(),
            });
        }
        Ok(())
    }
}

/// A difficulty schedule steering toward a target interblock interval.
///
/// Each block nudges the difficulty by 1/128 of its current value: up when
/// the previous two blocks arrived closer together than the target
/// interval, down otherwise, never below the configured minimum.
///
/// Timestamps must be monotonic up to a backward tolerance and may not run
/// ahead of the local clock by more than the future tolerance.
pub struct StandardPolicy<A: Action> {
    target_interval: Duration,
    minimum_difficulty: u64,
    future_clock_skew: Duration,
    backward_clock_skew: Duration,
    block_action: Option<A>,
}

impl<A: Action> StandardPolicy<A> {
    pub fn new(target_interval: Duration, minimum_difficulty: u64) -> Self {
        Self {
            target_interval,
            minimum_difficulty: minimum_difficulty.max(2),
            future_clock_skew: Duration::seconds(900),
            backward_clock_skew: Duration::zero(),
            block_action: None,
        }
    }

    /// Override the permitted clock skew: how far a block may run ahead of
    /// the local clock, and how far it may fall behind its parent.
    pub fn with_clock_skew(mut self, future: Duration, backward: Duration) -> Self {
        self.future_clock_skew = future;
        self.backward_clock_skew = backward;
        self
    }

    pub fn with_block_action(mut self, action: A) -> Self {
        self.block_action = Some(action);
        self
    }

    fn adjustment(difficulty: u64) -> u64 {
        (difficulty / 128).max(1)
    }
}

impl<A: Action> BlockPolicy<A> for StandardPolicy<A> {
    fn block_action(&self) -> Option<A> {
        self.block_action.clone()
    }

    fn next_difficulty(&self, tip: Option<&Block<A>>, parent: Option<&Block<A>>) -> u64 {
        let Some(tip) = tip else {
            return 0;
        };
        let Some(parent) = parent else {
            return self.minimum_difficulty;
        };

        let spacing = tip.timestamp() - parent.timestamp();
        let current = tip.difficulty().max(self.minimum_difficulty);
        let step = Self::adjustment(current);
        if spacing < self.target_interval {
            current.saturating_add(step)
        } else {
            current.saturating_sub(step).max(self.minimum_difficulty)
        }
    }

    fn validate_next_block(
        &self,
        tip: Option<&Block<A>>,
        next: &Block<A>,
        now: DateTime<Utc>,
    ) -> Result<(), BlockError> {
        if next.timestamp() > now + self.future_clock_skew {
            return Err(BlockError::InvalidTimestamp {
                timestamp: next.timestamp(),
                limit: now + self.future_clock_skew,
            });
        }
        if let Some(tip) = tip {
            // Timestamps must not regress past the backward tolerance; a
            // backdated block would also ratchet the difficulty schedule.
            let floor = tip.timestamp() - self.backward_clock_skew;
            if next.timestamp() < floor {
                return Err(BlockError::InvalidTimestamp {
                    timestamp: next.timestamp(),
                    limit: floor,
                });
            }
        }

        match tip {
            None => {
                if next.difficulty() != 0 {
                    return Err(BlockError::InvalidDifficulty {
                        difficulty: next.difficulty(),
                    });
                }
            }
            Some(tip) => {
                if next.difficulty() < self.minimum_difficulty {
                    return Err(BlockError::InvalidDifficulty {
                        difficulty: next.difficulty(),
                    });
                }
                // The schedule moves by at most one step per block.
                let current = tip.difficulty().max(self.minimum_difficulty);
                let step = Self::adjustment(current);
                if next.difficulty() > current.saturating_add(step) {
                    return Err(BlockError::InvalidDifficulty {
                        difficulty: next.difficulty(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lodestone_core::{
        AccountStateDelta, ActionContext, ActionError, CancelToken, Value, ValueError,
    };

    #[derive(Clone, Debug)]
    struct Noop;

    impl Action for Noop {
        fn execute(
            &self,
            context: &ActionContext,
        ) -> std::result::Result<AccountStateDelta, ActionError> {
            Ok(context.previous_states.clone())
        }

        fn plain_value(&self) -> Value {
            Value::Null
        }

        fn load_plain_value(_: &Value) -> std::result::Result<Self, ValueError> {
            Ok(Noop)
        }
    }

    fn block_at(
        index: u64,
        difficulty: u64,
        previous: Option<&Block<Noop>>,
        minute: u32,
    ) -> Block<Noop> {
        Block::mine(
            index,
            difficulty,
            None,
            previous.map(Block::hash),
            Utc.with_ymd_and_hms(2024, 5, 10, 12, minute, 0).unwrap(),
            vec![],
            1,
            &CancelToken::new(),
        )
        .unwrap()
    }

    fn noon_plus(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_null_policy_difficulty() {
        let policy = NullPolicy::<Noop>::new(16);
        assert_eq!(policy.next_difficulty(None, None), 0);

        let genesis = block_at(0, 0, None, 0);
        assert_eq!(policy.next_difficulty(Some(&genesis), None), 16);
    }

    #[test]
    fn test_standard_policy_raises_when_fast() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(5), 64);
        let genesis = block_at(0, 0, None, 0);
        let first = block_at(1, 64, Some(&genesis), 1);

        // One minute apart, target is five: difficulty rises by a step.
        let next = policy.next_difficulty(Some(&first), Some(&genesis));
        assert_eq!(next, 64 + 1);
    }

    #[test]
    fn test_standard_policy_lowers_when_slow_but_bounded() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(1), 64);
        let genesis = block_at(0, 0, None, 0);
        let first = block_at(1, 64, Some(&genesis), 30);

        let next = policy.next_difficulty(Some(&first), Some(&genesis));
        assert_eq!(next, 64);
    }

    #[test]
    fn test_standard_policy_rejects_jump() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(5), 64);
        let genesis = block_at(0, 0, None, 0);
        let jumped = block_at(1, 1024, Some(&genesis), 1);

        assert!(matches!(
            policy.validate_next_block(Some(&genesis), &jumped, noon_plus(1)),
            Err(BlockError::InvalidDifficulty { .. })
        ));
    }

    #[test]
    fn test_standard_policy_rejects_backdated_block() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(5), 64);
        let genesis = block_at(0, 0, None, 0);
        let tip = block_at(1, 64, Some(&genesis), 10);
        // Timestamped before its parent.
        let backdated = block_at(2, 64, Some(&tip), 5);

        assert!(matches!(
            policy.validate_next_block(Some(&tip), &backdated, noon_plus(10)),
            Err(BlockError::InvalidTimestamp { .. })
        ));

        // An equal timestamp sits on the floor and passes.
        let level = block_at(2, 64, Some(&tip), 10);
        policy
            .validate_next_block(Some(&tip), &level, noon_plus(10))
            .unwrap();
    }

    #[test]
    fn test_standard_policy_backward_skew_tolerance() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(5), 64)
            .with_clock_skew(Duration::seconds(900), Duration::minutes(2));
        let genesis = block_at(0, 0, None, 0);
        let tip = block_at(1, 64, Some(&genesis), 10);

        // One minute behind the parent: inside the two-minute tolerance.
        let slightly_behind = block_at(2, 64, Some(&tip), 9);
        policy
            .validate_next_block(Some(&tip), &slightly_behind, noon_plus(10))
            .unwrap();

        // Five minutes behind: outside it.
        let far_behind = block_at(2, 64, Some(&tip), 5);
        assert!(matches!(
            policy.validate_next_block(Some(&tip), &far_behind, noon_plus(10)),
            Err(BlockError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_standard_policy_rejects_far_future_block() {
        let policy = StandardPolicy::<Noop>::new(Duration::minutes(5), 64);
        let genesis = block_at(0, 0, None, 0);
        let future = block_at(1, 64, Some(&genesis), 30);

        // The local clock reads noon; 12:30 is beyond the 15-minute window.
        assert!(matches!(
            policy.validate_next_block(Some(&genesis), &future, noon_plus(0)),
            Err(BlockError::InvalidTimestamp { .. })
        ));

        // Within the window it passes.
        policy
            .validate_next_block(Some(&genesis), &future, noon_plus(20))
            .unwrap();
    }

    #[test]
    fn test_validate_blocks_folds_linkage() {
        let policy = NullPolicy::<Noop>::new(2);
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 13, 0, 0).unwrap();

        let genesis = block_at(0, 0, None, 0);
        let first = block_at(1, 2, Some(&genesis), 1);
        let second = block_at(2, 2, Some(&first), 2);

        policy
            .validate_blocks(&[genesis.clone(), first, second], now)
            .unwrap();

        let stray = block_at(3, 2, Some(&genesis), 3);
        assert!(policy.validate_blocks(&[genesis, stray], now).is_err());
    }
}
