//! Leaky bucket: a bounded per-key queue drained at a fixed rate.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::decision::{Receipt, ThrottleReason};
use super::state::{BucketState, Queued};
use super::strategy::{AdmissionStrategy, Attempt};
use crate::config::StrategyKind;

/// Each key queues up to `capacity` requests; every tick removes up to
/// `drain_rate` of them in FIFO order.
///
/// A full queue always throttles here. Waiting for space is handled by the
/// limiter, which retries after a drain.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u32,
    drain_rate: u32,
    interval: Duration,
    /// Next ticket to hand out, shared by all keys
    next_ticket: AtomicU64,
}

impl LeakyBucket {
    pub fn new(capacity: u32, drain_rate: u32, interval: Duration) -> Self {
        Self {
            capacity,
            drain_rate,
            interval,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Upper bound on the time until the item at `position` is drained.
    fn estimated_wait(&self, position: usize) -> Duration {
        let rate = self.drain_rate.max(1) as usize;
        let ticks = position.div_ceil(rate);
        self.interval.saturating_mul(ticks as u32)
    }
}

impl<R> AdmissionStrategy<R> for LeakyBucket {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeakyBucket
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn seed(&self, now: DateTime<Utc>) -> BucketState<R> {
        BucketState::empty_queue(now)
    }

    fn try_admit(&self, state: &mut BucketState<R>, request: R, now: DateTime<Utc>) -> Attempt<R> {
        state.last_seen = now;

        if state.queue.len() >= self.capacity as usize {
            return Attempt::Throttled {
                reason: ThrottleReason::QueueFull,
                request,
            };
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        state.queue.push_back(Queued {
            ticket,
            enqueued_at: now,
            request,
        });
        let position = state.queue.len();

        Attempt::Admitted {
            receipt: Receipt::Queued {
                ticket,
                position,
                estimated_wait: self.estimated_wait(position),
            },
            request: None,
        }
    }

    fn on_tick(&self, state: &mut BucketState<R>) -> Vec<Queued<R>> {
        let count = (self.drain_rate as usize).min(state.queue.len());
        state.queue.drain(..count).collect()
    }

    fn level(&self, state: &BucketState<R>) -> u32 {
        state.queue.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn bucket(capacity: u32, drain_rate: u32) -> LeakyBucket {
        LeakyBucket::new(capacity, drain_rate, Duration::from_secs(3))
    }

    #[test]
    fn test_fresh_key_starts_empty() {
        let bucket = bucket(3, 1);
        let state: BucketState<u32> = bucket.seed(now());
        assert_eq!(bucket.level(&state), 0);
    }

    #[test]
    fn test_rejects_when_full() {
        let bucket = bucket(3, 1);
        let mut state = bucket.seed(now());

        for i in 0..3u32 {
            assert!(matches!(
                bucket.try_admit(&mut state, i, now()),
                Attempt::Admitted { request: None, .. }
            ));
        }

        match bucket.try_admit(&mut state, 99, now()) {
            Attempt::Throttled { reason, request } => {
                assert_eq!(reason, ThrottleReason::QueueFull);
                assert_eq!(request, 99);
            }
            other => panic!("expected throttle, got {:?}", other),
        }
        assert_eq!(bucket.level(&state), 3);
    }

    #[test]
    fn test_receipt_reports_order_and_wait() {
        let bucket = bucket(4, 2);
        let mut state = bucket.seed(now());

        let mut receipts = Vec::new();
        for i in 0..3u32 {
            if let Attempt::Admitted { receipt, .. } = bucket.try_admit(&mut state, i, now()) {
                receipts.push(receipt);
            }
        }

        assert_eq!(
            receipts,
            vec![
                Receipt::Queued {
                    ticket: 1,
                    position: 1,
                    estimated_wait: Duration::from_secs(3),
                },
                Receipt::Queued {
                    ticket: 2,
                    position: 2,
                    estimated_wait: Duration::from_secs(3),
                },
                Receipt::Queued {
                    ticket: 3,
                    position: 3,
                    estimated_wait: Duration::from_secs(6),
                },
            ]
        );
    }

    #[test]
    fn test_drain_is_fifo_and_bounded_by_rate() {
        let bucket = bucket(5, 2);
        let mut state = bucket.seed(now());
        for i in 0..5u32 {
            let _ = bucket.try_admit(&mut state, i, now());
        }

        let drained: Vec<u32> = bucket.on_tick(&mut state).into_iter().map(|q| q.request).collect();
        assert_eq!(drained, vec![0, 1]);
        assert_eq!(bucket.level(&state), 3);
    }

    #[test]
    fn test_drain_conservation() {
        let bucket = bucket(5, 2);
        let mut state = bucket.seed(now());
        for i in 0..5u32 {
            let _ = bucket.try_admit(&mut state, i, now());
        }

        for k in 1..=4u32 {
            bucket.on_tick(&mut state);
            let expected = 5u32.saturating_sub(k * 2);
            assert_eq!(bucket.level(&state), expected);
        }
    }

    #[test]
    fn test_flush_empties_queue() {
        let bucket = bucket(3, 1);
        let mut state = bucket.seed(now());
        for i in 0..3u32 {
            let _ = bucket.try_admit(&mut state, i, now());
        }

        let flushed = bucket.flush(&mut state);
        assert_eq!(flushed.len(), 3);
        assert_eq!(bucket.level(&state), 0);
    }
}
