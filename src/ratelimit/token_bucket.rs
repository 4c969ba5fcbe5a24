//! Token bucket with maintenance-driven batch refill.

use chrono::{DateTime, Utc};

use super::decision::{Receipt, ThrottleReason};
use super::state::{BucketState, Queued};
use super::strategy::{AdmissionStrategy, Attempt};
use crate::config::StrategyKind;

/// Each key holds up to `capacity` tokens; every admission consumes one.
///
/// Tokens come back only through [`on_tick`](AdmissionStrategy::on_tick),
/// `refill_amount` per tick. An admission never refills lazily, so a fresh
/// key admits exactly `capacity` requests before the next tick.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_amount: u32,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_amount: u32) -> Self {
        Self {
            capacity,
            refill_amount,
        }
    }
}

impl<R> AdmissionStrategy<R> for TokenBucket {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenBucket
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn seed(&self, now: DateTime<Utc>) -> BucketState<R> {
        BucketState::with_tokens(self.capacity, now)
    }

    fn try_admit(&self, state: &mut BucketState<R>, request: R, now: DateTime<Utc>) -> Attempt<R> {
        state.last_seen = now;

        if state.tokens == 0 {
            return Attempt::Throttled {
                reason: ThrottleReason::Exhausted,
                request,
            };
        }

        state.tokens -= 1;
        Attempt::Admitted {
            receipt: Receipt::Tokens {
                remaining: state.tokens,
            },
            request: Some(request),
        }
    }

    fn on_tick(&self, state: &mut BucketState<R>) -> Vec<Queued<R>> {
        state.tokens = state
            .tokens
            .saturating_add(self.refill_amount)
            .min(self.capacity);
        Vec::new()
    }

    fn level(&self, state: &BucketState<R>) -> u32 {
        state.tokens
    }
}
