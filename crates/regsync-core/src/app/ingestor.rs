//! ChangeStreamIngestor: upstream change feeds -> SyncPackage tasks.
//!
//! Per registry, one batch at a time:
//! 1. load (or initialise and persist) the registry's cursor
//! 2. fetch up to `batch_size` changes after `since`
//! 3. create a SyncPackage task for each change the registry owns
//! 4. persist the cursor every `commit_every` records and at batch end
//!
//! The cursor only ever moves past records whose tasks are already in the
//! task store. A crash between the two replays records on restart, and the
//! one-active-task-per-target rule absorbs the replay.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::service::TaskService;
use super::worker::PeriodicJob;
use crate::config::{ChangesStreamConfig, SyncMode};
use crate::domain::{
    ChangeFeedCursor, ExecuteError, Outcome, Registry, RegistryRouter, SinceToken, SyncError, Task,
};
use crate::impls::ChangeSources;
use crate::ports::{ChangeRecord, Clock, CursorStore, PackageIndex, RegistryStore};
use crate::typed::{ChangesStreamPayload, Handler, SyncPackagePayload, TaskPayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub registry_name: String,
    pub fetched: usize,
    pub created: usize,
    /// Changes whose target already had an active task.
    pub absorbed: usize,
    /// Changes owned by another registry or filtered by sync mode.
    pub skipped: usize,
    /// Cursor position after the batch.
    pub since: SinceToken,
}

pub struct ChangeStreamIngestor {
    registries: Arc<dyn RegistryStore>,
    cursors: Arc<dyn CursorStore>,
    sources: ChangeSources,
    service: Arc<TaskService>,
    package_index: Option<Arc<dyn PackageIndex>>,
    clock: Arc<dyn Clock>,
    settings: ChangesStreamConfig,
    reported_conflicts: Mutex<HashSet<String>>,
}

impl ChangeStreamIngestor {
    pub fn new(
        registries: Arc<dyn RegistryStore>,
        cursors: Arc<dyn CursorStore>,
        sources: ChangeSources,
        service: Arc<TaskService>,
        clock: Arc<dyn Clock>,
        settings: ChangesStreamConfig,
    ) -> Self {
        Self {
            registries,
            cursors,
            sources,
            service,
            package_index: None,
            clock,
            settings,
            reported_conflicts: Mutex::new(HashSet::new()),
        }
    }

    /// Catalogue consulted in `exist` sync mode.
    pub fn with_package_index(mut self, index: Arc<dyn PackageIndex>) -> Self {
        self.package_index = Some(index);
        self
    }

    pub fn settings(&self) -> &ChangesStreamConfig {
        &self.settings
    }

    async fn load_router(&self) -> Result<RegistryRouter, SyncError> {
        let router = RegistryRouter::new(self.registries.list_registries().await?);

        let mut reported = self.reported_conflicts.lock().unwrap_or_else(|e| e.into_inner());
        for conflict in router.conflicts() {
            let key = format!("{}|{}|{}", conflict.scope, conflict.winner, conflict.loser);
            if reported.insert(key) {
                warn!(
                    scope = %conflict.scope,
                    winner = %conflict.winner,
                    loser = %conflict.loser,
                    "registries claim the same scope, earliest created wins"
                );
            }
        }
        Ok(router)
    }

    async fn load_cursor(&self, registry: &Registry) -> Result<ChangeFeedCursor, SyncError> {
        if let Some(cursor) = self.cursors.load_cursor(&registry.name).await? {
            return Ok(cursor);
        }
        let since = self
            .sources
            .for_type(registry.registry_type)
            .initial_since(registry)
            .await?;
        let cursor = ChangeFeedCursor::new(&registry.name, since, self.clock.now());
        self.cursors.save_cursor(&cursor).await?;
        info!(registry = %registry.name, since = %cursor.since, "initialised change feed cursor");
        Ok(cursor)
    }

    async fn commit(&self, cursor: &mut ChangeFeedCursor, seq: &SinceToken) -> Result<(), SyncError> {
        if cursor.advance(seq.clone(), self.clock.now()) {
            self.cursors.save_cursor(cursor).await?;
        } else {
            warn!(
                registry = %cursor.registry_name,
                since = %cursor.since,
                seq = %seq,
                "change feed went backwards, cursor kept"
            );
        }
        Ok(())
    }

    async fn wanted(&self, router: &RegistryRouter, registry: &Registry, fullname: &str) -> Result<bool, SyncError> {
        if !router.needs_sync(&registry.name, fullname) {
            return Ok(false);
        }
        match (self.settings.sync_mode, &self.package_index) {
            (SyncMode::Exist, Some(index)) => Ok(index.contains(fullname).await?),
            _ => Ok(true),
        }
    }

    async fn enqueue(&self, registry: &Registry, record: &ChangeRecord) -> Result<bool, SyncError> {
        let payload = SyncPackagePayload::new(&record.fullname, &registry.name)
            .with_tips(format!("change {} from registry {}", record.seq, registry.name));
        let request = payload
            .into_new_task(&record.fullname)
            .map_err(|e| ExecuteError::permanent(format!("unserializable sync payload: {e}")))?
            .with_biz_id(format!("SyncPackage:{}", record.fullname));

        let enqueued = self.service.create_task(request).await?;
        Ok(enqueued.is_created())
    }

    /// Ingests one batch for `registry_name`.
    pub async fn ingest_once(&self, registry_name: &str) -> Result<IngestReport, SyncError> {
        let router = self.load_router().await?;
        let registry = router
            .find(registry_name)
            .cloned()
            .ok_or_else(|| SyncError::RegistryNotFound(registry_name.to_string()))?;
        let source = self.sources.for_type(registry.registry_type);

        let mut cursor = self.load_cursor(&registry).await?;
        let records = source
            .fetch_changes(&registry, &cursor.since, self.settings.batch_size)
            .await?;

        let mut report = IngestReport {
            registry_name: registry.name.clone(),
            fetched: records.len(),
            created: 0,
            absorbed: 0,
            skipped: 0,
            since: cursor.since.clone(),
        };

        let commit_every = self.settings.commit_every.max(1);
        for (i, record) in records.iter().enumerate() {
            if self.wanted(&router, &registry, &record.fullname).await? {
                if self.enqueue(&registry, record).await? {
                    report.created += 1;
                } else {
                    report.absorbed += 1;
                }
            } else {
                debug!(registry = %registry.name, fullname = %record.fullname, "change not owned, skipped");
                report.skipped += 1;
            }

            if (i + 1) % commit_every == 0 {
                self.commit(&mut cursor, &record.seq).await?;
            }
        }
        if let Some(last) = records.last() {
            self.commit(&mut cursor, &last.seq).await?;
        }

        report.since = cursor.since.clone();
        if report.fetched > 0 {
            info!(
                registry = %registry.name,
                fetched = report.fetched,
                created = report.created,
                absorbed = report.absorbed,
                skipped = report.skipped,
                since = %report.since,
                "ingested change batch"
            );
        }
        Ok(report)
    }

    /// Makes sure every registry has a ChangesStream task. Returns how many
    /// were created.
    pub async fn schedule_streams(&self) -> Result<usize, SyncError> {
        let router = self.load_router().await?;
        let mut created = 0;
        for registry in router.registries() {
            let payload = ChangesStreamPayload {
                registry_name: registry.name.clone(),
            };
            if self.service.create(registry.stream_target(), payload).await?.is_created() {
                created += 1;
            }
        }
        Ok(created)
    }
}

#[async_trait]
impl PeriodicJob for ChangeStreamIngestor {
    fn name(&self) -> &'static str {
        "changes_stream_schedule"
    }

    async fn run_once(&self) -> Result<(), SyncError> {
        self.schedule_streams().await.map(|_| ())
    }
}

/// Executor of ChangesStream tasks: drains up to `max_batches_per_run`
/// batches, stopping early at the head of the feed.
pub struct ChangesStreamHandler {
    ingestor: Arc<ChangeStreamIngestor>,
}

impl ChangesStreamHandler {
    pub fn new(ingestor: Arc<ChangeStreamIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl Handler<ChangesStreamPayload> for ChangesStreamHandler {
    async fn handle(&self, _task: &Task, payload: ChangesStreamPayload) -> Result<Outcome, ExecuteError> {
        let settings = self.ingestor.settings();
        let mut batches = 0;
        let mut fetched = 0;
        let mut created = 0;
        let mut since = None;

        while batches < settings.max_batches_per_run {
            let report = self.ingestor.ingest_once(&payload.registry_name).await?;
            batches += 1;
            fetched += report.fetched;
            created += report.created;
            since = Some(report.since);
            if report.fetched < settings.batch_size {
                break;
            }
        }

        let since = since.map(|s| s.to_string()).unwrap_or_default();
        Ok(Outcome::success()
            .with_summary(format!(
                "{batches} batches, {fetched} changes, {created} new tasks, since {since}"
            ))
            .with_details(serde_json::json!({
                "batches": batches,
                "fetched": fetched,
                "created": created,
                "since": since,
            })))
    }
}
