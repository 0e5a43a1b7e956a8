//! DedupQueue port.
//!
//! The queue only tells workers that work may be waiting. It is never the
//! authority: everything it holds can be rebuilt by scanning the task store
//! for Waiting tasks, which the reconciliation sweep does.

use async_trait::async_trait;

use crate::domain::QueueError;

/// FIFO per channel that refuses items already present.
#[async_trait]
pub trait DedupQueue: Send + Sync {
    /// Appends `item` unless the channel already holds it. Returns whether
    /// it was appended. The duplicate check and the append are one atomic
    /// step.
    async fn push(&self, channel: &str, item: &str) -> Result<bool, QueueError>;

    /// Removes the oldest item.
    async fn pop(&self, channel: &str) -> Result<Option<String>, QueueError>;

    async fn length(&self, channel: &str) -> Result<usize, QueueError>;
}
