//! In-memory task store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Enqueued, RequeueReason, StoreError, Task, TaskCounts, TaskId, TaskState, TaskType};
use crate::ports::{Clock, TaskStore};

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, Task>,

    /// `(task_type, target_name)` -> the single Waiting/Processing task.
    active: HashMap<(TaskType, String), TaskId>,
}

impl TaskTable {
    fn get_mut(&mut self, task_id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))
    }

    fn release_active(&mut self, task: &Task) {
        let key = (task.task_type, task.target_name.clone());
        if self.active.get(&key) == Some(&task.task_id) {
            self.active.remove(&key);
        }
    }
}

/// `TaskStore` held in process memory.
///
/// One mutex guards the whole table, which makes every operation the
/// atomic conditional update the trait asks for.
pub struct InMemoryTaskStore {
    clock: Arc<dyn Clock>,
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            table: Mutex::new(TaskTable::default()),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<Enqueued, StoreError> {
        let mut table = self.table.lock().await;
        let key = (task.task_type, task.target_name.clone());

        if let Some(existing) = table.active.get(&key).and_then(|id| table.tasks.get(id)) {
            return Ok(Enqueued::Existing(existing.clone()));
        }
        if table.tasks.contains_key(&task.task_id) {
            return Err(StoreError::Conflict(format!("task id {} already exists", task.task_id)));
        }

        table.active.insert(key, task.task_id);
        table.tasks.insert(task.task_id, task.clone());
        Ok(Enqueued::Created(task))
    }

    async fn find_task(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.table.lock().await.tasks.get(&task_id).cloned())
    }

    async fn find_active_task(&self, task_type: TaskType, target_name: &str) -> Result<Option<Task>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .active
            .get(&(task_type, target_name.to_string()))
            .and_then(|id| table.tasks.get(id))
            .cloned())
    }

    async fn claim(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let Some(task) = table.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if task.state != TaskState::Waiting {
            return Ok(None);
        }
        task.claim(now)?;
        Ok(Some(task.clone()))
    }

    async fn claim_next(&self, task_type: TaskType) -> Result<Option<Task>, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let next = table
            .tasks
            .values()
            .filter(|t| t.task_type == task_type && t.state == TaskState::Waiting)
            .min_by_key(|t| (t.created_at, t.task_id))
            .map(|t| t.task_id);

        let Some(task_id) = next else {
            return Ok(None);
        };
        let task = table.get_mut(task_id)?;
        task.claim(now)?;
        Ok(Some(task.clone()))
    }

    async fn mark_success(&self, task_id: TaskId, summary: Option<String>) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let task = table.get_mut(task_id)?;
        task.mark_success(summary, now)?;
        let task = task.clone();
        table.release_active(&task);
        Ok(task)
    }

    async fn mark_error(&self, task_id: TaskId, error: String) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let task = table.get_mut(task_id)?;
        task.mark_error(error, now)?;
        let task = task.clone();
        table.release_active(&task);
        Ok(task)
    }

    async fn requeue(&self, task_id: TaskId, reason: RequeueReason) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let task = table.get_mut(task_id)?;
        task.requeue(reason, now)?;
        Ok(task.clone())
    }

    async fn list_by_state(
        &self,
        task_type: Option<TaskType>,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let table = self.table.lock().await;
        let mut tasks: Vec<Task> = table
            .tasks
            .values()
            .filter(|t| t.state == state && task_type.is_none_or(|ty| t.task_type == ty))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.updated_at, t.task_id));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn counts_by_state(&self, task_type: Option<TaskType>) -> Result<TaskCounts, StoreError> {
        let table = self.table.lock().await;
        let mut counts = TaskCounts::default();
        for task in table.tasks.values() {
            if task_type.is_none_or(|ty| task.task_type == ty) {
                counts.record(task.state);
            }
        }
        Ok(counts)
    }
}
