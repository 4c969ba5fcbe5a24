//! Per-key admission limiter.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::clock::{to_chrono, Clock, SystemClock};
use super::decision::{Decision, ThrottleReason, Verdict};
use super::maintenance::{self, TickReport};
use super::metrics::{MetricsSink, NoopMetrics};
use super::state::KeyedState;
use super::strategy::{build_strategy, AdmissionStrategy, Attempt};
use crate::config::{BlockingMode, LimiterConfig, StrategyKind};
use crate::error::{LimiterError, Result};

/// Outcome of [`Limiter::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Leaky-bucket items drained by the final flush
    pub flushed: usize,
    /// The limiter had already been shut down; nothing was done
    pub already_shut_down: bool,
}

/// State shared between callers and the maintenance task.
pub(crate) struct Shared<K, R> {
    pub(crate) config: LimiterConfig,
    pub(crate) ttl: chrono::Duration,
    pub(crate) strategy: Box<dyn AdmissionStrategy<R>>,
    pub(crate) buckets: KeyedState<K, R>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<dyn MetricsSink<K, R>>,
    /// Raised after every drain so wait-mode callers re-check their queue
    pub(crate) drained: Notify,
    pub(crate) shutting_down: AtomicBool,
    /// Set by the final flush. Leaky admissions hold the read side while
    /// they touch a queue, the flush holds the write side.
    pub(crate) flushed: RwLock<bool>,
    pub(crate) last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl<K, R> Shared<K, R>
where
    K: Eq + Hash + Clone + Debug,
{
    /// One non-blocking attempt for `key`, under the key's shard lock.
    fn try_admit(&self, key: &K, request: R) -> Attempt<R> {
        let flushed = (self.strategy.kind() == StrategyKind::LeakyBucket)
            .then(|| self.flushed.read());

        let now = self.clock.now();
        let mut state = self.buckets.entry(key.clone()).or_insert_with(|| {
            debug!(key = ?key, strategy = %self.strategy.kind(), "Creating bucket state");
            self.strategy.seed(now)
        });

        // Nothing may be queued once the final flush has run.
        if flushed.as_deref() == Some(&true) {
            state.last_seen = now;
            return Attempt::Throttled {
                reason: ThrottleReason::ShuttingDown,
                request,
            };
        }

        self.strategy.try_admit(state.value_mut(), request, now)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Background task bookkeeping.
#[derive(Default)]
struct Lifecycle {
    stop: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<usize>>,
}

/// Admission limiter applying one strategy independently to every key.
///
/// `admit` may be called from any number of tasks. Calls for the same key
/// serialize on that key's state; calls for other keys only contend when
/// they share a shard of the underlying map. A background maintenance task
/// started with [`start`](Limiter::start) refills or drains every key once
/// per interval and evicts keys idle past the ttl.
///
/// Once [`shutdown`](Limiter::shutdown) is signaled the limiter keeps
/// serving but no new maintenance tick starts. Token buckets spend their
/// remaining tokens and are never refilled. Leaky buckets keep queueing
/// until the final flush has run and throttle with
/// [`ThrottleReason::ShuttingDown`] after it, since nothing would drain
/// later items. A wait-mode caller facing a full queue during shutdown
/// gets the same answer instead of waiting.
pub struct Limiter<K, R = ()> {
    shared: Arc<Shared<K, R>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<K, R> Limiter<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Create a limiter using the system clock and no metrics.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(SystemClock), Arc::new(NoopMetrics))
    }

    /// Create a limiter with an injected clock and metrics sink.
    pub fn with_collaborators(
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink<K, R>>,
    ) -> Result<Self> {
        config.validate()?;

        debug!(
            strategy = %config.strategy,
            capacity = config.capacity,
            rate = config.rate,
            interval_ms = config.interval_ms,
            ttl_ms = config.ttl_ms,
            blocking = ?config.blocking,
            "Creating limiter"
        );

        let shared = Shared {
            ttl: to_chrono(config.ttl()),
            strategy: build_strategy(&config),
            buckets: KeyedState::new(),
            clock,
            metrics,
            drained: Notify::new(),
            shutting_down: AtomicBool::new(false),
            flushed: RwLock::new(false),
            last_tick: Mutex::new(None),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// The configuration this limiter was built from.
    pub fn config(&self) -> &LimiterConfig {
        &self.shared.config
    }

    /// Launch the maintenance task on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();

        if self.shared.is_shutting_down() {
            return Err(LimiterError::ShutdownInProgress);
        }
        if lifecycle.task.is_some() {
            return Err(LimiterError::AlreadyStarted);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LimiterError::Maintenance(e.to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(maintenance::run(Arc::clone(&self.shared), stop_rx));

        lifecycle.stop = Some(stop_tx);
        lifecycle.task = Some(task);

        info!(
            strategy = %self.shared.config.strategy,
            interval_ms = self.shared.config.interval_ms,
            "Limiter started"
        );
        Ok(())
    }

    /// Decide whether `request` for `key` is admitted.
    ///
    /// Returns immediately except for leaky buckets in wait mode, which
    /// suspend until a drain frees space or the wait bound elapses.
    pub async fn admit(&self, key: K, request: R) -> Decision<K, R> {
        let decision = match self.shared.config.blocking {
            BlockingMode::Reject => {
                let attempt = self.shared.try_admit(&key, request);
                into_decision(key, attempt)
            }
            BlockingMode::Wait => self.admit_waiting(key, request).await,
        };

        match decision.verdict {
            Verdict::Admitted => {
                trace!(key = ?decision.key, receipt = ?decision.receipt, "Request admitted");
                self.shared.metrics.on_admitted(&decision.key);
            }
            Verdict::Throttled(reason) => {
                debug!(key = ?decision.key, reason = %reason, "Request throttled");
                self.shared.metrics.on_throttled(&decision.key);
            }
        }

        decision
    }

    /// Retry while the queue is full, parking between drains.
    async fn admit_waiting(&self, key: K, mut request: R) -> Decision<K, R> {
        let deadline = self
            .shared
            .config
            .wait_timeout()
            .map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            // Registered before the check so a drain in between is not missed.
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.try_admit(&key, request) {
                Attempt::Throttled {
                    reason: ThrottleReason::QueueFull,
                    request: returned,
                } if self.shared.is_shutting_down() => {
                    return Decision::throttled(key, ThrottleReason::ShuttingDown, returned);
                }
                Attempt::Throttled {
                    reason: ThrottleReason::QueueFull,
                    request: returned,
                } => request = returned,
                attempt => return into_decision(key, attempt),
            }

            trace!(key = ?key, "Queue full, waiting for a drain");

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Decision::throttled(key, ThrottleReason::WaitTimeout, request);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Run one maintenance pass now: evict idle keys, then refill or drain
    /// the rest.
    pub fn tick(&self) -> Result<TickReport> {
        self.shared.tick()
    }

    /// Stop the maintenance task, flush every queued leaky-bucket item and
    /// wait for the task to finish.
    ///
    /// Only the first call does anything; later calls return a report with
    /// `already_shut_down` set.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(ShutdownReport {
                flushed: 0,
                already_shut_down: true,
            });
        }

        info!("Shutting down limiter");
        self.shared.drained.notify_waiters();

        let (stop, task) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.stop.take(), lifecycle.task.take())
        };

        let flushed = match (stop, task) {
            (Some(stop), Some(task)) => {
                let _ = stop.send(true);
                task.await
                    .map_err(|e| LimiterError::Maintenance(e.to_string()))?
            }
            _ => self.shared.flush(),
        };

        info!(flushed, "Limiter shut down");
        Ok(ShutdownReport {
            flushed,
            already_shut_down: false,
        })
    }

    /// Current level of `key`: available tokens or queue depth.
    pub fn level_of(&self, key: &K) -> Option<u32> {
        self.shared
            .buckets
            .get(key)
            .map(|state| self.shared.strategy.level(state.value()))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.buckets.contains_key(key)
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.shared.buckets.len()
    }

    /// Whether the maintenance task is running.
    pub fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }
}

fn into_decision<K, R>(key: K, attempt: Attempt<R>) -> Decision<K, R> {
    match attempt {
        Attempt::Admitted { receipt, request } => Decision::admitted(key, receipt, request),
        Attempt::Throttled { reason, request } => Decision::throttled(key, reason, request),
    }
}
