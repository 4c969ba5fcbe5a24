//! Admission strategy abstraction.

use chrono::{DateTime, Utc};

use super::decision::{Receipt, ThrottleReason};
use super::leaky_bucket::LeakyBucket;
use super::state::{BucketState, Queued};
use super::token_bucket::TokenBucket;
use crate::config::{LimiterConfig, StrategyKind};

/// Outcome of a single strategy attempt against a key's state.
#[derive(Debug)]
pub enum Attempt<R> {
    /// The request was admitted. `request` is handed back unless the
    /// strategy retained it.
    Admitted { receipt: Receipt, request: Option<R> },
    /// The request was rejected and is handed back.
    Throttled { reason: ThrottleReason, request: R },
}

/// Algorithm deciding admissions and the per-tick effect on a key's state.
///
/// Implementations are pure state transformers. Callers hold exclusive
/// access to the state for the duration of every call.
pub trait AdmissionStrategy<R>: Send + Sync {
    /// Which algorithm this is.
    fn kind(&self) -> StrategyKind;

    /// Maximum level of a key.
    fn capacity(&self) -> u32;

    /// State for a key seen for the first time.
    fn seed(&self, now: DateTime<Utc>) -> BucketState<R>;

    /// Try to admit `request`, mutating `state`.
    fn try_admit(&self, state: &mut BucketState<R>, request: R, now: DateTime<Utc>) -> Attempt<R>;

    /// Apply the periodic refill or drain. Returns the drained items.
    fn on_tick(&self, state: &mut BucketState<R>) -> Vec<Queued<R>>;

    /// Remove every pending item. Used once, on shutdown.
    fn flush(&self, state: &mut BucketState<R>) -> Vec<Queued<R>> {
        state.queue.drain(..).collect()
    }

    /// Current level: available tokens or queue depth.
    fn level(&self, state: &BucketState<R>) -> u32;
}

/// Build the strategy selected by `config`.
pub fn build_strategy<R: Send + 'static>(config: &LimiterConfig) -> Box<dyn AdmissionStrategy<R>> {
    match config.strategy {
        StrategyKind::TokenBucket => Box::new(TokenBucket::new(config.capacity, config.rate)),
        StrategyKind::LeakyBucket => {
            Box::new(LeakyBucket::new(config.capacity, config.rate, config.interval()))
        }
    }
}
