//! DistributedLock port.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LockError, LockToken};

/// TTL-based advisory mutex shared by all workers.
///
/// A lock whose acquisition time is older than `now - ttl` counts as free.
/// Expiry compares timestamps written by different processes, so worker
/// clocks must agree to well within the reconciliation sweep's
/// `stale_grace`. Larger skew lets a second worker take a lock early.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Takes `name` if it is free or expired. `Ok(None)` when it is held.
    /// Not reentrant: a second acquire by the same caller fails.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>, LockError>;

    /// Frees `name` if `token` still owns it. A stale or foreign token is a
    /// silent no-op.
    async fn release(&self, name: &str, token: &LockToken) -> Result<(), LockError>;
}
