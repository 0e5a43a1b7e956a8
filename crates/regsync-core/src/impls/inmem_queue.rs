//! InMemoryDedupQueue: single-process dedup queue.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::QueueError;
use crate::ports::DedupQueue;

#[derive(Default)]
struct Channel {
    items: VecDeque<String>,
    members: HashSet<String>,
}

/// `DedupQueue` held in process memory.
///
/// # Implementation
/// - `HashMap<String, Channel>` keeps one FIFO per channel name
/// - each channel keeps a member set next to its deque, so the duplicate
///   check and the append happen under the same mutex guard
pub struct InMemoryDedupQueue {
    channels: Mutex<HashMap<String, Channel>>,
}

impl InMemoryDedupQueue {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDedupQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupQueue for InMemoryDedupQueue {
    async fn push(&self, channel: &str, item: &str) -> Result<bool, QueueError> {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(channel.to_string()).or_default();
        if !channel.members.insert(item.to_string()) {
            return Ok(false);
        }
        channel.items.push_back(item.to_string());
        Ok(true)
    }

    async fn pop(&self, channel: &str) -> Result<Option<String>, QueueError> {
        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get_mut(channel) else {
            return Ok(None);
        };
        let item = channel.items.pop_front();
        if let Some(item) = &item {
            channel.members.remove(item);
        }
        Ok(item)
    }

    async fn length(&self, channel: &str) -> Result<usize, QueueError> {
        let channels = self.channels.lock().await;
        Ok(channels.get(channel).map_or(0, |c| c.items.len()))
    }
}
