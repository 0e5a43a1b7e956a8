//! Task lifecycle events.

use serde::Serialize;

use super::ids::TaskId;
use super::task::{Task, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Start,
    Success,
    Error,
    Requeued,
    RetryScheduled,
    RetriesExhausted,
}

impl TaskEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskEventKind::Created => "created",
            TaskEventKind::Start => "start",
            TaskEventKind::Success => "success",
            TaskEventKind::Error => "error",
            TaskEventKind::Requeued => "requeued",
            TaskEventKind::RetryScheduled => "retry_scheduled",
            TaskEventKind::RetriesExhausted => "retries_exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub target_name: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            kind,
            task_id: task.task_id,
            task_type: task.task_type,
            target_name: task.target_name.clone(),
            attempts: task.attempts,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
