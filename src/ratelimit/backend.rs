//! Admission trait for hosts that admit or reject units of work.

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;

use super::decision::Decision;
use super::limiter::Limiter;

/// Anything that can decide whether a unit of work for a key may proceed.
///
/// Hosts (servers, job runners, the demo driver) depend on this trait
/// rather than on a concrete limiter.
#[async_trait]
pub trait Admission<K, R>: Send + Sync {
    /// Admit or throttle `request` for `key`.
    async fn admit(&self, key: K, request: R) -> Decision<K, R>;
}

#[async_trait]
impl<K, R> Admission<K, R> for Limiter<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn admit(&self, key: K, request: R) -> Decision<K, R> {
        Limiter::admit(self, key, request).await
    }
}
