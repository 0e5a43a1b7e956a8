//! Status - task and queue counts per task type.

use std::collections::BTreeMap;

use serde::Serialize;

use super::service::TaskService;
use crate::domain::{SyncError, TaskCounts, TaskType};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeStatus {
    pub tasks: TaskCounts,
    /// Ids waiting on the dedup-queue channel.
    pub queued: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub total: TaskCounts,
    pub by_type: BTreeMap<TaskType, TypeStatus>,
}

impl StatusReport {
    /// Counts for `task_types`. A queue length far below `waiting` means
    /// queue items were lost and the store scan is doing the work.
    pub async fn collect(service: &TaskService, task_types: &[TaskType]) -> Result<Self, SyncError> {
        let mut report = StatusReport {
            total: service.store().counts_by_state(None).await?,
            by_type: BTreeMap::new(),
        };
        for &task_type in task_types {
            let tasks = service.store().counts_by_state(Some(task_type)).await?;
            let queued = service.queue().length(&task_type.queue_channel()).await?;
            report.by_type.insert(task_type, TypeStatus { tasks, queued });
        }
        Ok(report)
    }
}
