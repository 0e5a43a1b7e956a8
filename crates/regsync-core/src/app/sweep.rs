//! ReconciliationSweep: repairs what crashed workers and lost queue items
//! leave behind.
//!
//! - Processing tasks untouched for longer than the lock TTL plus the grace
//!   period go back to Waiting (or to Error once their attempts are spent),
//!   provided their lock is actually free.
//! - Waiting tasks older than `repush_after` are pushed onto their channel
//!   again. The dedup queue makes this a no-op when the id is still queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::service::TaskService;
use super::worker::PeriodicJob;
use crate::config::SyncConfig;
use crate::domain::{RequeueReason, SyncError, Task, TaskEvent, TaskEventKind, TaskState};
use crate::ports::{Clock, DistributedLock, EventSink, TaskStore};

/// TTL of the probe lock taken while repairing a stale task.
const PROBE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub requeued: usize,
    pub exhausted: usize,
    /// Stale tasks whose lock is still held; left for a later sweep.
    pub still_locked: usize,
    pub repushed: usize,
}

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub stale_after: Duration,
    pub repush_after: Duration,
    pub batch_limit: usize,
    pub max_attempts: u32,
}

impl SweepSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            stale_after: config.lock.execution_timeout() + config.reconcile.stale_grace(),
            repush_after: config.reconcile.repush_after(),
            batch_limit: config.reconcile.batch_limit,
            max_attempts: config.retry.max_attempts,
        }
    }
}

pub struct ReconciliationSweep {
    service: Arc<TaskService>,
    lock: Arc<dyn DistributedLock>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    settings: SweepSettings,
}

impl ReconciliationSweep {
    pub fn new(
        service: Arc<TaskService>,
        lock: Arc<dyn DistributedLock>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            service,
            lock,
            clock,
            events,
            settings,
        }
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.service.store()
    }

    fn older_than(&self, task: &Task, age: Duration) -> bool {
        let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        task.updated_at + age <= self.clock.now()
    }

    pub async fn sweep(&self) -> Result<SweepReport, SyncError> {
        let mut report = SweepReport::default();
        self.repair_stale(&mut report).await?;
        self.repush_waiting(&mut report).await?;

        if report != SweepReport::default() {
            info!(
                requeued = report.requeued,
                exhausted = report.exhausted,
                still_locked = report.still_locked,
                repushed = report.repushed,
                "reconciliation sweep"
            );
        }
        Ok(report)
    }

    async fn repair_stale(&self, report: &mut SweepReport) -> Result<(), SyncError> {
        let processing = self
            .store()
            .list_by_state(None, TaskState::Processing, self.settings.batch_limit)
            .await?;

        // Oldest first: stop at the first task still within its window.
        for task in processing
            .into_iter()
            .take_while(|t| self.older_than(t, self.settings.stale_after))
        {
            let lock_name = task.lock_name();
            let Some(token) = self.lock.acquire(&lock_name, PROBE_TTL).await? else {
                debug!(task_id = %task.task_id, lock = %lock_name, "stale task still locked");
                report.still_locked += 1;
                continue;
            };

            let result = self.repair(task, report).await;
            if let Err(err) = self.lock.release(&lock_name, &token).await {
                warn!(lock = %lock_name, error = %err, "probe lock release failed");
            }
            result?;
        }
        Ok(())
    }

    async fn repair(&self, task: Task, report: &mut SweepReport) -> Result<(), SyncError> {
        if task.attempts >= self.settings.max_attempts {
            let failed = self
                .store()
                .mark_error(task.task_id, "worker lost; attempts exhausted".to_string())
                .await?;
            self.events.emit(
                &TaskEvent::new(TaskEventKind::RetriesExhausted, &failed).with_detail("abandoned by its worker"),
            );
            report.exhausted += 1;
            return Ok(());
        }

        let requeued = self.store().requeue(task.task_id, RequeueReason::Stale).await?;
        self.events
            .emit(&TaskEvent::new(TaskEventKind::Requeued, &requeued).with_detail("stale processing task"));
        if let Err(err) = self.service.push(&requeued).await {
            warn!(task_id = %requeued.task_id, error = %err, "push after requeue failed");
        }
        report.requeued += 1;
        Ok(())
    }

    async fn repush_waiting(&self, report: &mut SweepReport) -> Result<(), SyncError> {
        let waiting = self
            .store()
            .list_by_state(None, TaskState::Waiting, self.settings.batch_limit)
            .await?;

        for task in waiting
            .iter()
            .take_while(|t| self.older_than(t, self.settings.repush_after))
        {
            if self.service.push(task).await? {
                debug!(task_id = %task.task_id, task_type = %task.task_type, "re-pushed waiting task");
                report.repushed += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for ReconciliationSweep {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        self.sweep().await.map(|_| ())
    }
}
