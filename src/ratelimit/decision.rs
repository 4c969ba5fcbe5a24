//! Admission decisions returned to callers.

use std::fmt;
use std::time::Duration;

/// Why an admission was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleReason {
    /// Token bucket has no tokens left until the next refill.
    Exhausted,
    /// Leaky bucket queue is at capacity.
    QueueFull,
    /// Wait-mode admission gave up after its wait bound.
    WaitTimeout,
    /// Leaky bucket stopped queueing because shutdown was signaled.
    ShuttingDown,
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleReason::Exhausted => write!(f, "no tokens left"),
            ThrottleReason::QueueFull => write!(f, "queue full"),
            ThrottleReason::WaitTimeout => write!(f, "timed out waiting for queue space"),
            ThrottleReason::ShuttingDown => write!(f, "limiter is shutting down"),
        }
    }
}

/// Outcome of an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admitted,
    Throttled(ThrottleReason),
}

/// Details attached to an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Token bucket admission.
    Tokens {
        /// Tokens left for the key after this admission
        remaining: u32,
    },
    /// Leaky bucket admission.
    Queued {
        /// Global processing order of the item
        ticket: u64,
        /// 1-based position in the key's queue
        position: usize,
        /// Upper bound on the time until the item is drained
        estimated_wait: Duration,
    },
}

/// Result of [`Limiter::admit`](super::Limiter::admit).
#[derive(Debug, Clone)]
pub struct Decision<K, R> {
    /// The key the decision was made for
    pub key: K,
    /// Admitted or throttled, with the reason
    pub verdict: Verdict,
    /// Present for admitted requests
    pub receipt: Option<Receipt>,
    /// The request, handed back whenever the limiter does not keep it
    pub request: Option<R>,
}

impl<K, R> Decision<K, R> {
    pub(crate) fn admitted(key: K, receipt: Receipt, request: Option<R>) -> Self {
        Self {
            key,
            verdict: Verdict::Admitted,
            receipt: Some(receipt),
            request,
        }
    }

    pub(crate) fn throttled(key: K, reason: ThrottleReason, request: R) -> Self {
        Self {
            key,
            verdict: Verdict::Throttled(reason),
            receipt: None,
            request: Some(request),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.verdict == Verdict::Admitted
    }

    pub fn is_throttled(&self) -> bool {
        !self.is_admitted()
    }

    /// The throttle reason, if throttled.
    pub fn throttle_reason(&self) -> Option<ThrottleReason> {
        match self.verdict {
            Verdict::Admitted => None,
            Verdict::Throttled(reason) => Some(reason),
        }
    }

    /// Human-readable diagnostic.
    pub fn reason(&self) -> String {
        match (&self.verdict, &self.receipt) {
            (Verdict::Throttled(reason), _) => format!("throttled: {}", reason),
            (Verdict::Admitted, Some(Receipt::Tokens { remaining })) => {
                format!("admitted: {} tokens remaining", remaining)
            }
            (
                Verdict::Admitted,
                Some(Receipt::Queued {
                    ticket,
                    position,
                    estimated_wait,
                }),
            ) => format!(
                "admitted: ticket {} queued at position {}, drained within {:?}",
                ticket, position, estimated_wait
            ),
            (Verdict::Admitted, None) => "admitted".to_string(),
        }
    }
}
