//! Execution collaborators.

use async_trait::async_trait;

use crate::domain::{ExecuteError, Outcome, SyncError, Task};

/// Does the actual work of a task (fetch a package, refresh a cache entry,
/// stream a registry's changes).
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<Outcome, ExecuteError>;
}

/// Hook run after a task has been marked Success.
///
/// Failures are logged by the coordinator and never change the task.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_success(&self, task: &Task) -> Result<(), SyncError>;
}
