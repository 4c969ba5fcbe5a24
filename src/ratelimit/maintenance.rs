//! Background maintenance: refill/drain, idle eviction and the shutdown flush.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use super::limiter::Shared;
use super::state::Drained;
use crate::error::{LimiterError, Result};

/// Summary of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Keys removed for being idle past the ttl
    pub evicted: usize,
    /// Keys refilled or drained
    pub updated: usize,
    /// Leaky-bucket items drained
    pub drained: usize,
    /// Keys left after the pass
    pub live_keys: usize,
}

impl<K, R> Shared<K, R>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Evict idle keys and apply the strategy's interval effect to the rest.
    ///
    /// Each key is handled under its shard lock in a single step, so a key
    /// is either evicted or updated in a given pass. Keys with queued items
    /// are kept until their queue is empty.
    pub(crate) fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        {
            let mut last_tick = self.last_tick.lock();
            let previous = last_tick.replace(now);
            if let Some(previous) = previous {
                if now < previous {
                    return Err(LimiterError::ClockRegression { previous, now });
                }
            }
        }

        let mut evicted = Vec::new();
        let mut drained = Vec::new();
        let mut updated = 0;

        self.buckets.retain(|key, state| {
            if state.is_idle(now, self.ttl) && !state.has_pending_work() {
                evicted.push(key.clone());
                return false;
            }

            drained.extend(
                self.strategy
                    .on_tick(state)
                    .into_iter()
                    .map(|item| Drained::new(key.clone(), item, now, false)),
            );
            updated += 1;
            true
        });

        for key in &evicted {
            debug!(key = ?key, "Evicted idle key");
            self.metrics.on_evicted(key);
        }

        self.report_drained(&drained);
        if !drained.is_empty() {
            self.drained.notify_waiters();
        }

        let report = TickReport {
            evicted: evicted.len(),
            updated,
            drained: drained.len(),
            live_keys: self.buckets.len(),
        };
        trace!(?report, "Maintenance tick complete");
        Ok(report)
    }

    /// Drain every queued item and close the queues to further admissions.
    /// Returns how many were drained.
    pub(crate) fn flush(&self) -> usize {
        let mut closed = self.flushed.write();
        let now = self.clock.now();
        let mut flushed = Vec::new();

        for mut entry in self.buckets.iter_mut() {
            let key = entry.key().clone();
            flushed.extend(
                self.strategy
                    .flush(entry.value_mut())
                    .into_iter()
                    .map(|item| Drained::new(key.clone(), item, now, true)),
            );
        }
        *closed = true;
        drop(closed);

        self.report_drained(&flushed);
        self.drained.notify_waiters();
        flushed.len()
    }

    fn report_drained(&self, items: &[Drained<K, R>]) {
        for item in items {
            info!(
                key = ?item.key,
                ticket = item.ticket,
                queued_ms = item.queued_for().num_milliseconds(),
                on_shutdown = item.on_shutdown,
                "Resolved queued request"
            );
            self.metrics.on_drained(item);
        }
    }
}

/// Maintenance loop: one pass per interval until `stop` fires or its sender
/// is dropped, then a final flush. Returns the number of flushed items.
#[instrument(
    name = "maintenance",
    skip_all,
    fields(strategy = %shared.config.strategy, interval_ms = shared.config.interval_ms)
)]
pub(crate) async fn run<K, R>(shared: Arc<Shared<K, R>>, mut stop: watch::Receiver<bool>) -> usize
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let period = shared.config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Maintenance loop started");

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = shared.tick() {
                    warn!(error = %err, "Maintenance tick failed");
                    shared.metrics.on_tick_error(&err);
                }
            }
        }
    }

    info!("Maintenance loop stopping, flushing queued requests");
    let flushed = shared.flush();
    info!(flushed, "Maintenance loop stopped");
    flushed
}

#[cfg(test)]
mod tests {
    use crate::config::{BlockingMode, LimiterConfig, StrategyKind};
    use crate::error::LimiterError;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::metrics::CounterMetrics;
    use crate::ratelimit::Limiter;
    use std::sync::Arc;
    use std::time::Duration;

    fn leaky(capacity: u32, rate: u32) -> LimiterConfig {
        LimiterConfig::new(
            StrategyKind::LeakyBucket,
            capacity,
            rate,
            Duration::from_secs(3),
            Duration::from_secs(10),
            BlockingMode::Reject,
        )
    }

    #[tokio::test]
    async fn test_tick_report_counts() {
        let clock = Arc::new(ManualClock::default());
        let limiter = Limiter::<&str, u32>::with_collaborators(
            leaky(4, 2),
            clock.clone(),
            Arc::new(CounterMetrics::new()),
        )
        .unwrap();

        for i in 0..3 {
            limiter.admit("a", i).await;
        }
        limiter.admit("b", 10).await;

        let report = limiter.tick().unwrap();
        assert_eq!(report.evicted, 0);
        assert_eq!(report.updated, 2);
        assert_eq!(report.drained, 3);
        assert_eq!(report.live_keys, 2);
        assert_eq!(limiter.level_of(&"a"), Some(1));
        assert_eq!(limiter.level_of(&"b"), Some(0));
    }

    #[tokio::test]
    async fn test_drain_conservation_over_ticks() {
        let limiter: Limiter<&str, u32> = Limiter::new(leaky(5, 2)).unwrap();
        for i in 0..5 {
            limiter.admit("a", i).await;
        }

        for k in 1..=4u32 {
            limiter.tick().unwrap();
            assert_eq!(limiter.level_of(&"a"), Some(5u32.saturating_sub(k * 2)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reports_tick_errors_and_keeps_running() {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(CounterMetrics::new());
        let limiter =
            Limiter::<&str, u32>::with_collaborators(leaky(2, 1), clock.clone(), metrics.clone()).unwrap();
        limiter.start().unwrap();

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(3100)).await;

        clock.rewind(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(metrics.snapshot().tick_errors, 1);

        limiter.admit("a", 1).await;
        clock.advance(Duration::from_secs(6));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(limiter.level_of(&"a"), Some(0));
        assert!(limiter.is_running());

        let report = limiter.shutdown().await.unwrap();
        assert_eq!(report.flushed, 0);
        assert_eq!(metrics.snapshot().drained, 1);
    }

    #[tokio::test]
    async fn test_dropping_limiter_stops_loop() {
        let limiter: Limiter<&str> = Limiter::new(LimiterConfig::default()).unwrap();
        limiter.start().unwrap();
        assert!(limiter.is_running());
        drop(limiter);
    }

    #[test]
    fn test_clock_regression_error_message() {
        let now = chrono::Utc::now();
        let err = LimiterError::ClockRegression {
            previous: now,
            now: now - chrono::Duration::seconds(1),
        };
        assert!(err.to_string().starts_with("Clock moved backwards"));
    }
}
