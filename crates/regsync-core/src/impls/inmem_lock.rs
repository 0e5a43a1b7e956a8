//! In-memory advisory lock with TTL expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{LockError, LockToken};
use crate::ports::{Clock, DistributedLock, IdGenerator};

struct Holder {
    token: LockToken,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
}

impl Holder {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self.acquired_at + ttl <= now,
            Err(_) => false,
        }
    }
}

/// `DistributedLock` held in process memory. Expired holders are replaced
/// on the next acquire; nothing sweeps them in the background.
pub struct InMemoryLock {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    holders: Mutex<HashMap<String, Holder>>,
}

impl InMemoryLock {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            holders: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let now = self.clock.now();
        let mut holders = self.holders.lock().await;

        if let Some(holder) = holders.get(name) {
            if !holder.expired(now) {
                debug!(%name, "lock held");
                return Ok(None);
            }
            debug!(%name, acquired_at = %holder.acquired_at, "taking over expired lock");
        }

        let token = self.ids.generate_lock_token();
        holders.insert(
            name.to_string(),
            Holder {
                token,
                acquired_at: now,
                ttl,
            },
        );
        debug!(%name, %token, ?ttl, "lock acquired");
        Ok(Some(token))
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<(), LockError> {
        let mut holders = self.holders.lock().await;
        match holders.get(name) {
            Some(holder) if holder.token == *token => {
                holders.remove(name);
                debug!(%name, %token, "lock released");
            }
            _ => debug!(%name, %token, "lock not owned, release skipped"),
        }
        Ok(())
    }
}
