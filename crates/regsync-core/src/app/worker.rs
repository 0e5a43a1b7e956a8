//! WorkerGroup: spawns coordinator and periodic loops and stops them together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::coordinator::TaskCoordinator;
use crate::domain::SyncError;

/// Background job run on a fixed interval (sweep, stream scheduling, proxy
/// cache refresh).
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<(), SyncError>;
}

/// Worker group handle.
/// - `request_shutdown()` stops every loop from taking new work
/// - `shutdown_and_join()` also waits for them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Spawns `n` coordinator loops sharing one coordinator.
    pub fn spawn_coordinators(&mut self, n: usize, coordinator: Arc<TaskCoordinator>) {
        for worker_id in 0..n {
            let coordinator = Arc::clone(&coordinator);
            let rx = self.shutdown_tx.subscribe();
            self.joins.push(tokio::spawn(coordinator.run(worker_id, rx)));
        }
    }

    /// Spawns `job` to run every `interval`, first run immediately.
    pub fn spawn_periodic(&mut self, job: Arc<dyn PeriodicJob>, interval: Duration) {
        let mut rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rx.changed() => {}
                    _ = ticker.tick() => {
                        if let Err(err) = job.run_once().await {
                            warn!(job = job.name(), error = %err, kind = ?err.kind(), "periodic job failed");
                        }
                    }
                }
                if *rx.borrow() {
                    break;
                }
            }
            info!(job = job.name(), "periodic job stopped");
        }));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all loops. In-flight task bodies are not
    /// cancelled; loops stop taking new work.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker loop ended abnormally");
            }
        }
    }
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}
