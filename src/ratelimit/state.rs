//! Per-key bucket state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Mapping from key to its bucket state, owned by one limiter.
///
/// Each shard of the map is guarded by its own lock; admissions and
/// maintenance both mutate a key under that lock.
pub type KeyedState<K, R> = DashMap<K, BucketState<R>>;

/// State held for a single key.
///
/// Token buckets only use `tokens`; leaky buckets only use `queue`, whose
/// length is the key's queue depth.
#[derive(Debug)]
pub struct BucketState<R> {
    /// Available tokens (token bucket)
    pub tokens: u32,
    /// Accepted but not yet drained items (leaky bucket)
    pub queue: VecDeque<Queued<R>>,
    /// Last admission attempt touching this key
    pub last_seen: DateTime<Utc>,
}

impl<R> BucketState<R> {
    /// A token bucket seeded at `tokens`.
    pub fn with_tokens(tokens: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens,
            queue: VecDeque::new(),
            last_seen: now,
        }
    }

    /// An empty leaky bucket.
    pub fn empty_queue(now: DateTime<Utc>) -> Self {
        Self {
            tokens: 0,
            queue: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Whether items are still waiting to be drained.
    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Whether the key has not been touched for longer than `ttl` at `now`.
    pub fn is_idle(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) > ttl
    }
}

/// An item accepted into a leaky bucket.
#[derive(Debug, Clone)]
pub struct Queued<R> {
    /// Global processing order
    pub ticket: u64,
    /// When the item was accepted
    pub enqueued_at: DateTime<Utc>,
    /// The caller's request
    pub request: R,
}

/// An item removed from a leaky bucket, by a tick or by the shutdown flush.
#[derive(Debug, Clone)]
pub struct Drained<K, R> {
    pub key: K,
    pub ticket: u64,
    pub enqueued_at: DateTime<Utc>,
    pub drained_at: DateTime<Utc>,
    pub request: R,
    /// Drained by the final flush rather than a regular tick
    pub on_shutdown: bool,
}

impl<K, R> Drained<K, R> {
    pub(crate) fn new(key: K, item: Queued<R>, drained_at: DateTime<Utc>, on_shutdown: bool) -> Self {
        Self {
            key,
            ticket: item.ticket,
            enqueued_at: item.enqueued_at,
            drained_at,
            request: item.request,
            on_shutdown,
        }
    }

    /// Time the item spent queued.
    pub fn queued_for(&self) -> chrono::Duration {
        self.drained_at.signed_duration_since(self.enqueued_at)
    }
}
