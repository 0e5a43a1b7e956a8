use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::{ExecuteError, StoreError};
use super::ids::TaskId;
use super::state::{RequeueReason, TaskState};

/// Kind of background work. Also names the dedup-queue channel and the
/// lock namespace for tasks of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SyncPackage,
    UpdateProxyCache,
    ChangesStream,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::SyncPackage, TaskType::UpdateProxyCache, TaskType::ChangesStream];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::SyncPackage => "sync_package",
            TaskType::UpdateProxyCache => "update_proxy_cache",
            TaskType::ChangesStream => "changes_stream",
        }
    }

    /// Dedup-queue channel for this task type.
    pub fn queue_channel(self) -> String {
        format!("tasks:{}", self.as_str())
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskType(pub String);

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTaskType(s.to_string()))
    }
}

/// Request to create a task. Producers (ingestor, refresher, API) build
/// these; the task service assigns id, timestamps and log path.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub target_name: String,
    pub biz_id: Option<String>,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub retry_of: Option<TaskId>,
}

impl NewTask {
    pub fn new(task_type: TaskType, target_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type,
            target_name: target_name.into(),
            biz_id: None,
            payload,
            attempts: 0,
            retry_of: None,
        }
    }

    pub fn with_biz_id(mut self, biz_id: impl Into<String>) -> Self {
        self.biz_id = Some(biz_id.into());
        self
    }

    /// A fresh task that continues the retry chain of `failed`.
    pub fn retry_of(failed: &Task) -> Self {
        Self {
            task_type: failed.task_type,
            target_name: failed.target_name.clone(),
            biz_id: failed.biz_id.clone(),
            payload: failed.payload.clone(),
            attempts: failed.attempts,
            retry_of: Some(failed.task_id),
        }
    }

    pub fn lock_name(&self) -> String {
        lock_name(self.task_type, &self.target_name)
    }
}

/// Persisted task record.
///
/// State changes go through the transition methods, which refuse anything
/// the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub target_name: String,
    pub biz_id: Option<String>,
    pub state: TaskState,

    /// Executions so far across the retry chain (incremented on claim).
    pub attempts: u32,

    pub payload: serde_json::Value,

    /// Result summary of a successful run.
    pub summary: Option<String>,

    /// Last error message.
    pub error: Option<String>,

    /// The failed task this one retries.
    pub retry_of: Option<TaskId>,

    /// Opaque pointer into the external log sink.
    pub log_path: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// When the current or last execution was claimed.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_request(task_id: TaskId, request: NewTask, now: DateTime<Utc>) -> Self {
        let log_path = format!(
            "/{}/{}/{}-{}.log",
            request.task_type,
            request.target_name,
            now.format("%Y-%m-%dT%H%M"),
            task_id
        );
        Self {
            task_id,
            task_type: request.task_type,
            target_name: request.target_name,
            biz_id: request.biz_id,
            state: TaskState::Waiting,
            attempts: request.attempts,
            payload: request.payload,
            summary: None,
            error: None,
            retry_of: request.retry_of,
            log_path,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    pub fn lock_name(&self) -> String {
        lock_name(self.task_type, &self.target_name)
    }

    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P, ExecuteError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ExecuteError::permanent(format!("malformed {} payload: {e}", self.task_type)))
    }

    fn transition(&mut self, to: TaskState, now: DateTime<Utc>) -> Result<(), StoreError> {
        if !self.state.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                task_id: self.task_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Waiting -> Processing, counting one more attempt.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.transition(TaskState::Processing, now)?;
        self.attempts += 1;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_success(&mut self, summary: Option<String>, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.transition(TaskState::Success, now)?;
        self.summary = summary;
        Ok(())
    }

    pub fn mark_error(&mut self, error: String, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.transition(TaskState::Error, now)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn requeue(&mut self, reason: RequeueReason, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.transition(TaskState::Waiting, now)?;
        if reason == RequeueReason::LockContention {
            self.attempts = self.attempts.saturating_sub(1);
        }
        Ok(())
    }
}

/// Result of a task creation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    Created(Task),
    /// An active task for the same `(task_type, target_name)` already
    /// existed; it is returned unchanged.
    Existing(Task),
}

impl Enqueued {
    pub fn task(&self) -> &Task {
        match self {
            Enqueued::Created(task) | Enqueued::Existing(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            Enqueued::Created(task) | Enqueued::Existing(task) => task,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Enqueued::Created(_))
    }
}

pub fn lock_name(task_type: TaskType, target_name: &str) -> String {
    format!("{task_type}:{target_name}")
}
