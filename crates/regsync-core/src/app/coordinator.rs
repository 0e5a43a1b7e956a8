//! TaskCoordinator: the worker loop.
//!
//! One iteration:
//! 1. claim the next runnable task (queue fast path, store scan fallback)
//! 2. take the task's lock, or requeue the task if someone holds it
//! 3. run the executor on a spawned task under the lock TTL as deadline,
//!    aborting it when the deadline passes
//! 4. record success or failure, schedule a retry if the decider says so
//! 5. release the lock

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::service::TaskService;
use crate::config::{SyncConfig, TypeOrdering};
use crate::domain::{
    Decider, Decision, ErrorKind, ExecuteError, NewTask, Outcome, RequeueReason, RetryPolicy, SyncError, Task,
    TaskEvent, TaskEventKind, TaskId, TaskType,
};
use crate::ports::{DistributedLock, EventSink, SyncExecutor, TaskObserver, TaskStore};
use crate::typed::ExecutorRegistry;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub task_types: Vec<TaskType>,
    pub ordering: TypeOrdering,
    /// Lock TTL and execution deadline.
    pub execution_timeout: Duration,
    pub idle_interval: Duration,
    pub store_scan_interval: Duration,
    pub backoff: RetryPolicy,
}

impl CoordinatorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            task_types: config.worker.task_types.clone(),
            ordering: config.worker.ordering,
            execution_timeout: config.lock.execution_timeout(),
            idle_interval: config.worker.idle_interval(),
            store_scan_interval: config.worker.store_scan_interval(),
            backoff: config.retry.backoff(),
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Nothing runnable.
    Idle,
    /// Claimed, but the lock was held; the task is Waiting again.
    Contended(Task),
    /// Executed; the task is in its terminal state.
    Completed(Task),
}

pub struct TaskCoordinator {
    service: Arc<TaskService>,
    lock: Arc<dyn DistributedLock>,
    executors: ExecutorRegistry,
    decider: Arc<dyn Decider>,
    observers: Vec<Arc<dyn TaskObserver>>,
    events: Arc<dyn EventSink>,
    settings: CoordinatorSettings,
    next_type: AtomicUsize,
    last_scan: Mutex<Option<Instant>>,
}

impl TaskCoordinator {
    pub fn new(
        service: Arc<TaskService>,
        lock: Arc<dyn DistributedLock>,
        executors: ExecutorRegistry,
        decider: Arc<dyn Decider>,
        events: Arc<dyn EventSink>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            service,
            lock,
            executors,
            decider,
            observers: Vec::new(),
            events,
            settings,
            next_type: AtomicUsize::new(0),
            last_scan: Mutex::new(None),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.service.store()
    }

    /// Runs iterations until `shutdown` flips to true. Infrastructure
    /// failures back off exponentially; the running task body is never
    /// interrupted by shutdown.
    pub async fn run(self: Arc<Self>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        info!(worker_id, types = ?self.settings.task_types, "coordinator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.tick().await {
                Ok(Tick::Idle) => {
                    failures = 0;
                    Some(self.settings.idle_interval)
                }
                // The holder keeps the key until it releases or its TTL runs
                // out; claiming again right away would only requeue again.
                Ok(Tick::Contended(task)) => {
                    failures = 0;
                    debug!(worker_id, task_id = %task.task_id, "lock held elsewhere, pausing");
                    Some(self.settings.idle_interval)
                }
                Ok(Tick::Completed(_)) => {
                    failures = 0;
                    None
                }
                Err(err) if err.kind() == ErrorKind::Infrastructure => {
                    failures = failures.saturating_add(1);
                    let delay = self.settings.backoff.next_delay(failures);
                    warn!(worker_id, error = %err, failures, ?delay, "backend unavailable, backing off");
                    Some(delay)
                }
                Err(err) => {
                    failures = 0;
                    warn!(worker_id, error = %err, "coordinator iteration failed");
                    None
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!(worker_id, "coordinator stopped");
    }

    /// One iteration.
    pub async fn tick(&self) -> Result<Tick, SyncError> {
        let Some(task) = self.claim_next_runnable().await? else {
            return Ok(Tick::Idle);
        };

        let lock_name = task.lock_name();
        let token = match self.lock.acquire(&lock_name, self.settings.execution_timeout).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                let task = self.store().requeue(task.task_id, RequeueReason::LockContention).await?;
                self.events
                    .emit(&TaskEvent::new(TaskEventKind::Requeued, &task).with_detail("lock contention"));
                return Ok(Tick::Contended(task));
            }
            Err(err) => {
                // Do not leave the claim behind; the sweep would only find it
                // after the stale grace.
                if let Err(requeue_err) = self.store().requeue(task.task_id, RequeueReason::LockContention).await {
                    warn!(task_id = %task.task_id, error = %requeue_err, "requeue after lock failure failed");
                }
                return Err(err.into());
            }
        };

        let result = self.run_locked(task).await;

        if let Err(err) = self.lock.release(&lock_name, &token).await {
            warn!(lock = %lock_name, error = %err, "lock release failed, TTL will expire it");
        }
        result
    }

    fn ordered_types(&self) -> Vec<TaskType> {
        let mut types = self.settings.task_types.clone();
        if self.settings.ordering == TypeOrdering::RoundRobin && !types.is_empty() {
            let start = self.next_type.fetch_add(1, Ordering::Relaxed) % types.len();
            types.rotate_left(start);
        }
        types
    }

    fn scan_due(&self) -> bool {
        let last = self.last_scan.lock().unwrap_or_else(|e| e.into_inner());
        last.is_none_or(|at| at.elapsed() >= self.settings.store_scan_interval)
    }

    fn mark_scanned(&self) {
        *self.last_scan.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    async fn claim_next_runnable(&self) -> Result<Option<Task>, SyncError> {
        let types = self.ordered_types();

        for task_type in &types {
            let channel = task_type.queue_channel();
            while let Some(item) = self.service.queue().pop(&channel).await? {
                let Ok(task_id) = item.parse::<TaskId>() else {
                    warn!(%channel, %item, "dropping malformed queue item");
                    continue;
                };
                match self.store().claim(task_id).await? {
                    Some(task) => return Ok(Some(task)),
                    None => debug!(%task_id, "queued task no longer waiting"),
                }
            }
        }

        if !self.scan_due() {
            return Ok(None);
        }
        for task_type in types {
            if let Some(task) = self.store().claim_next(task_type).await? {
                debug!(task_id = %task.task_id, %task_type, "claimed by store scan");
                return Ok(Some(task));
            }
        }
        // Keep scanning while the scan finds work; throttle once drained.
        self.mark_scanned();
        Ok(None)
    }

    async fn run_locked(&self, task: Task) -> Result<Tick, SyncError> {
        self.events.emit(&TaskEvent::new(TaskEventKind::Start, &task));

        let result = match self.executors.get(task.task_type) {
            Some(executor) => self.execute_with_deadline(executor, task.clone()).await,
            None => Err(ExecuteError::permanent(format!(
                "no executor registered for {}",
                task.task_type
            ))),
        };

        match result {
            Ok(outcome) => self.record_success(task, outcome).await,
            Err(err) => self.record_failure(task, err).await,
        }
    }

    /// The body runs on its own tokio task. On deadline it is aborted and
    /// awaited, so it is gone before the lock is released and a retry can
    /// claim the key. Abort takes effect at the body's next `.await`.
    async fn execute_with_deadline(
        &self,
        executor: Arc<dyn SyncExecutor>,
        task: Task,
    ) -> Result<Outcome, ExecuteError> {
        let deadline = self.settings.execution_timeout;
        let task_id = task.task_id;
        let mut handle = tokio::spawn(async move { executor.execute(&task).await });

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(ExecuteError::permanent(format!(
                "executor panicked: {}",
                panic_message(join_err.into_panic())
            ))),
            Ok(Err(join_err)) => Err(ExecuteError::transient(format!("executor cancelled: {join_err}"))),
            Err(_) => {
                handle.abort();
                match handle.await {
                    Err(join_err) if join_err.is_cancelled() => {
                        debug!(%task_id, "timed out executor aborted");
                    }
                    _ => warn!(%task_id, "executor finished after its deadline"),
                }
                Err(ExecuteError::timeout(deadline))
            }
        }
    }

    async fn record_success(&self, task: Task, outcome: Outcome) -> Result<Tick, SyncError> {
        let done = self.store().mark_success(task.task_id, outcome.summary.clone()).await?;

        let mut event = TaskEvent::new(TaskEventKind::Success, &done);
        if let Some(summary) = &outcome.summary {
            event = event.with_detail(summary.clone());
        }
        self.events.emit(&event);

        for observer in &self.observers {
            if let Err(err) = observer.on_success(&done).await {
                warn!(
                    task_id = %done.task_id,
                    task_type = %done.task_type,
                    target = %done.target_name,
                    error = %err,
                    "completion hook failed"
                );
            }
        }
        Ok(Tick::Completed(done))
    }

    async fn record_failure(&self, task: Task, err: ExecuteError) -> Result<Tick, SyncError> {
        let failed = self.store().mark_error(task.task_id, err.message().to_string()).await?;
        self.events
            .emit(&TaskEvent::new(TaskEventKind::Error, &failed).with_detail(err.message()));

        match self.decider.decide(&failed, &err) {
            Decision::Retry { reason } => {
                let retry = self.service.create_task(NewTask::retry_of(&failed)).await?;
                self.events.emit(
                    &TaskEvent::new(TaskEventKind::RetryScheduled, &failed)
                        .with_detail(format!("{reason}, retry task {}", retry.task().task_id)),
                );
            }
            Decision::GiveUp { reason, exhausted: true } => {
                self.events
                    .emit(&TaskEvent::new(TaskEventKind::RetriesExhausted, &failed).with_detail(reason));
            }
            Decision::GiveUp { reason, exhausted: false } => {
                debug!(task_id = %failed.task_id, %reason, "not retrying");
            }
        }
        Ok(Tick::Completed(failed))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
