//! TaskService: create tasks and announce them on the dedup queue.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Enqueued, ExecuteError, NewTask, QueueError, SyncError, Task, TaskEvent, TaskEventKind, TaskState};
use crate::ports::{Clock, DedupQueue, EventSink, IdGenerator, TaskStore};
use crate::typed::TaskPayload;

/// Entry point for every producer (ingestor, refresher, coordinator
/// retries, API).
///
/// The store write is authoritative. The queue push after it is best
/// effort: a lost push only delays the task until a store scan or the
/// reconciliation sweep finds it.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DedupQueue>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DedupQueue>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            queue,
            ids,
            clock,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn DedupQueue> {
        &self.queue
    }

    /// Creates the task, or returns the active one for the same
    /// `(task_type, target_name)`.
    pub async fn create_task(&self, request: NewTask) -> Result<Enqueued, SyncError> {
        let task = Task::from_request(self.ids.generate_task_id(), request, self.clock.now());
        let enqueued = self.store.create_task(task).await?;

        match &enqueued {
            Enqueued::Created(task) => {
                self.events.emit(&TaskEvent::new(TaskEventKind::Created, task));
                self.announce(task).await;
            }
            Enqueued::Existing(task) => {
                debug!(
                    task_id = %task.task_id,
                    task_type = %task.task_type,
                    target = %task.target_name,
                    state = %task.state,
                    "active task exists, request absorbed"
                );
                if task.state == TaskState::Waiting {
                    self.announce(task).await;
                }
            }
        }
        Ok(enqueued)
    }

    /// Typed variant of [`create_task`](Self::create_task).
    pub async fn create<P: TaskPayload>(
        &self,
        target_name: impl Into<String>,
        payload: P,
    ) -> Result<Enqueued, SyncError> {
        let request = payload
            .into_new_task(target_name)
            .map_err(|e| ExecuteError::permanent(format!("unserializable {} payload: {e}", P::TASK_TYPE)))?;
        self.create_task(request).await
    }

    /// Pushes a Waiting task's id onto its channel. `Ok(false)` when it was
    /// already queued.
    pub async fn push(&self, task: &Task) -> Result<bool, QueueError> {
        self.queue
            .push(&task.task_type.queue_channel(), &task.task_id.to_string())
            .await
    }

    async fn announce(&self, task: &Task) {
        if let Err(err) = self.push(task).await {
            warn!(
                task_id = %task.task_id,
                task_type = %task.task_type,
                error = %err,
                "queue push failed, task left for store scan"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskType};
    use crate::impls::{InMemoryDedupQueue, InMemoryTaskStore, RecordingEventSink};
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::typed::SyncPackagePayload;
    use async_trait::async_trait;

    struct DownQueue;

    #[async_trait]
    impl DedupQueue for DownQueue {
        async fn push(&self, _channel: &str, _item: &str) -> Result<bool, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        async fn pop(&self, _channel: &str) -> Result<Option<String>, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
        async fn length(&self, _channel: &str) -> Result<usize, QueueError> {
            Err(QueueError::Unavailable("connection refused".into()))
        }
    }

    fn service(queue: Arc<dyn DedupQueue>) -> (TaskService, Arc<RecordingEventSink>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = Arc::new(RecordingEventSink::new());
        let service = TaskService::new(
            Arc::new(InMemoryTaskStore::new(clock.clone())),
            queue,
            Arc::new(UlidGenerator::new(clock.clone())),
            clock,
            events.clone(),
        );
        (service, events)
    }

    #[tokio::test]
    async fn created_task_is_queued_once() {
        let queue = Arc::new(InMemoryDedupQueue::new());
        let (service, events) = service(queue.clone());

        let first = service.create("foo", SyncPackagePayload::new("foo", "npm")).await.unwrap();
        let second = service.create("foo", SyncPackagePayload::new("foo", "npm")).await.unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        let channel = TaskType::SyncPackage.queue_channel();
        assert_eq!(queue.length(&channel).await.unwrap(), 1);

        let item = queue.pop(&channel).await.unwrap().unwrap();
        assert_eq!(item.parse::<TaskId>().unwrap(), first.task().task_id);
        assert_eq!(events.kinds(), vec![TaskEventKind::Created]);
    }

    #[tokio::test]
    async fn absorbed_request_requeues_lost_item() {
        let queue = Arc::new(InMemoryDedupQueue::new());
        let (service, _) = service(queue.clone());
        let channel = TaskType::SyncPackage.queue_channel();

        service.create("foo", SyncPackagePayload::new("foo", "npm")).await.unwrap();
        queue.pop(&channel).await.unwrap();

        service.create("foo", SyncPackagePayload::new("foo", "npm")).await.unwrap();
        assert_eq!(queue.length(&channel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queue_outage_does_not_fail_creation() {
        let (service, _) = service(Arc::new(DownQueue));
        let enqueued = service.create("foo", SyncPackagePayload::new("foo", "npm")).await.unwrap();
        assert!(enqueued.is_created());

        let stored = service.store().find_task(enqueued.task().task_id).await.unwrap();
        assert_eq!(stored.unwrap().state, TaskState::Waiting);
    }
}
