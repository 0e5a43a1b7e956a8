//! EventSink port: receives task lifecycle events.

use crate::domain::TaskEvent;

/// Observability only; emitting never fails and never affects the task.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}
