//! TaskStore port: the durable source of truth for tasks.

use async_trait::async_trait;

use crate::domain::{Enqueued, RequeueReason, StoreError, Task, TaskCounts, TaskId, TaskState, TaskType};

/// Persistent task records.
///
/// Every state change is a single conditional update on one task: the
/// implementation checks the current state and writes the new one
/// atomically, so two workers racing on the same task cannot both win.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores `task` unless an active task for the same
    /// `(task_type, target_name)` exists, in which case that one is returned
    /// and `task` is dropped.
    async fn create_task(&self, task: Task) -> Result<Enqueued, StoreError>;

    async fn find_task(&self, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// The Waiting or Processing task for `(task_type, target_name)`.
    async fn find_active_task(&self, task_type: TaskType, target_name: &str) -> Result<Option<Task>, StoreError>;

    /// Claims a specific task. `None` when it no longer exists or is not
    /// Waiting (someone else claimed it, or it already finished).
    async fn claim(&self, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Claims the oldest Waiting task of `task_type` (creation time, then
    /// id).
    async fn claim_next(&self, task_type: TaskType) -> Result<Option<Task>, StoreError>;

    async fn mark_success(&self, task_id: TaskId, summary: Option<String>) -> Result<Task, StoreError>;

    async fn mark_error(&self, task_id: TaskId, error: String) -> Result<Task, StoreError>;

    /// Processing -> Waiting.
    async fn requeue(&self, task_id: TaskId, reason: RequeueReason) -> Result<Task, StoreError>;

    /// Tasks in `state`, oldest `updated_at` first.
    async fn list_by_state(
        &self,
        task_type: Option<TaskType>,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError>;

    async fn counts_by_state(&self, task_type: Option<TaskType>) -> Result<TaskCounts, StoreError>;
}
