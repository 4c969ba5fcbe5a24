//! Rate limiting logic and state management.

mod backend;
mod clock;
mod decision;
mod leaky_bucket;
mod limiter;
mod maintenance;
mod metrics;
mod state;
mod strategy;
mod token_bucket;

pub use backend::Admission;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, Receipt, ThrottleReason, Verdict};
pub use leaky_bucket::LeakyBucket;
pub use limiter::{Limiter, ShutdownReport};
pub use maintenance::TickReport;
pub use metrics::{CounterMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use state::{BucketState, Drained, KeyedState, Queued};
pub use strategy::{build_strategy, AdmissionStrategy, Attempt};
pub use token_bucket::TokenBucket;
