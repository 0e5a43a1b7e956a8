//! IdGenerator port.

use crate::domain::ids::{LockToken, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Generates ids usable across workers without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_lock_token(&self) -> LockToken;
}

/// ULID generator. The time part comes from the `Clock`, so ids created
/// under a `FixedClock` share a timestamp and still differ in the random
/// part.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_lock_token(&self) -> LockToken {
        LockToken::from(self.next_ulid())
    }
}
