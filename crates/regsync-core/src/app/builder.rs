//! AppBuilder - wires backends, executors and observers into a runnable
//! engine.
//!
//! Fail-fast: `build()` refuses a configuration whose worker task types
//! have no executor, instead of letting those tasks fail one by one at run
//! time.

use std::sync::Arc;

use tracing::{info, warn};

use super::bug_versions::BugVersionCache;
use super::coordinator::{CoordinatorSettings, TaskCoordinator};
use super::ingestor::{ChangeStreamIngestor, ChangesStreamHandler};
use super::invalidator::CacheInvalidator;
use super::migration::{Migration, migrate_legacy};
use super::proxy_cache::ProxyCacheRefresher;
use super::service::TaskService;
use super::status::StatusReport;
use super::sweep::{ReconciliationSweep, SweepSettings};
use super::worker::WorkerGroup;
use crate::config::{ConfigError, SyncConfig, SyncMode};
use crate::domain::{Decider, DefaultDecider, SyncError, TaskType};
use crate::impls::{
    ChangeSources, InMemoryDedupQueue, InMemoryLock, InMemoryManifestCache, InMemoryProxyCacheStore,
    InMemoryRegistryStore, InMemoryTaskStore, StaticBugVersionSource, TracingEventSink,
};
use crate::ports::{
    BugVersionSource, Clock, CursorStore, DedupQueue, DistributedLock, EventSink, IdGenerator, ManifestCache,
    PackageIndex, ProxyCacheStore, RegistryStore, SyncExecutor, TaskObserver, TaskStore, UlidGenerator,
};
use crate::typed::{ChangesStreamPayload, ExecutorRegistry, Handler, RegistryError, TaskPayload};

/// Every shared backend and collaborator the engine talks to.
#[derive(Clone)]
pub struct Backends {
    pub tasks: Arc<dyn TaskStore>,
    pub queue: Arc<dyn DedupQueue>,
    pub lock: Arc<dyn DistributedLock>,
    pub registries: Arc<dyn RegistryStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub proxy_entries: Arc<dyn ProxyCacheStore>,
    pub manifests: Arc<dyn ManifestCache>,
    pub bug_versions: Arc<dyn BugVersionSource>,
    pub package_index: Option<Arc<dyn PackageIndex>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: Arc<dyn EventSink>,
}

impl Backends {
    /// Single-process backends: every store in memory, events to `tracing`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let registries = Arc::new(InMemoryRegistryStore::new());
        Self {
            tasks: Arc::new(InMemoryTaskStore::new(clock.clone())),
            queue: Arc::new(InMemoryDedupQueue::new()),
            lock: Arc::new(InMemoryLock::new(clock.clone(), ids.clone())),
            registries: registries.clone(),
            cursors: registries,
            proxy_entries: Arc::new(InMemoryProxyCacheStore::new()),
            manifests: Arc::new(InMemoryManifestCache::new()),
            bug_versions: Arc::new(StaticBugVersionSource::default()),
            package_index: None,
            clock,
            ids,
            events: Arc::new(TracingEventSink),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no executor registered for task types {0:?}")]
    MissingExecutors(Vec<TaskType>),

    #[error("change streaming is enabled but no change sources were given")]
    MissingChangeSources,

    #[error("sync mode `exist` needs a package index")]
    MissingPackageIndex,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct AppBuilder {
    config: SyncConfig,
    backends: Backends,
    sources: Option<ChangeSources>,
    executors: ExecutorRegistry,
    observers: Vec<Arc<dyn TaskObserver>>,
    decider: Option<Arc<dyn Decider>>,
}

impl AppBuilder {
    pub fn new(config: SyncConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            sources: None,
            executors: ExecutorRegistry::new(),
            observers: Vec::new(),
            decider: None,
        }
    }

    pub fn change_sources(mut self, sources: ChangeSources) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn register<P: TaskPayload, H: Handler<P> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.executors.register::<P, H>(handler)?;
        Ok(self)
    }

    pub fn register_executor(
        mut self,
        task_type: TaskType,
        executor: Arc<dyn SyncExecutor>,
    ) -> Result<Self, RegistryError> {
        self.executors.register_executor(task_type, executor)?;
        Ok(self)
    }

    /// Extra completion hook, run after the cache invalidator.
    pub fn observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replaces the default retry policy (`DefaultDecider` with
    /// `retry.max_attempts`).
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(mut self) -> Result<App, BuildError> {
        self.config.validate()?;
        let config = self.config;
        let backends = self.backends;

        let service = Arc::new(TaskService::new(
            backends.tasks.clone(),
            backends.queue.clone(),
            backends.ids.clone(),
            backends.clock.clone(),
            backends.events.clone(),
        ));

        let ingestor = if config.changes_stream.enabled {
            let sources = self.sources.take().ok_or(BuildError::MissingChangeSources)?;
            let mut ingestor = ChangeStreamIngestor::new(
                backends.registries.clone(),
                backends.cursors.clone(),
                sources,
                service.clone(),
                backends.clock.clone(),
                config.changes_stream.clone(),
            );
            match (&backends.package_index, config.changes_stream.sync_mode) {
                (Some(index), _) => ingestor = ingestor.with_package_index(index.clone()),
                (None, SyncMode::Exist) => return Err(BuildError::MissingPackageIndex),
                (None, SyncMode::All) => {}
            }
            let ingestor = Arc::new(ingestor);
            self.executors
                .register::<ChangesStreamPayload, _>(ChangesStreamHandler::new(ingestor.clone()))?;
            Some(ingestor)
        } else {
            None
        };

        let registered = self.executors.registered_types();
        let missing: Vec<TaskType> = config
            .worker
            .task_types
            .iter()
            .copied()
            .filter(|t| !registered.contains(t))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingExecutors(missing));
        }

        let bug_versions = Arc::new(BugVersionCache::new(
            backends.bug_versions.clone(),
            backends.manifests.clone(),
        ));
        let mut invalidator = CacheInvalidator::new(
            backends.manifests.clone(),
            backends.proxy_entries.clone(),
            backends.clock.clone(),
        );
        if config.bug_versions.enabled {
            invalidator = invalidator.with_bug_versions(bug_versions.clone(), config.bug_versions.package.clone());
        }

        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultDecider::new(config.retry.max_attempts)));
        let mut coordinator = TaskCoordinator::new(
            service.clone(),
            backends.lock.clone(),
            self.executors,
            decider,
            backends.events.clone(),
            CoordinatorSettings::from_config(&config),
        )
        .with_observer(Arc::new(invalidator));
        for observer in self.observers {
            coordinator = coordinator.with_observer(observer);
        }

        let sweep = Arc::new(ReconciliationSweep::new(
            service.clone(),
            backends.lock.clone(),
            backends.clock.clone(),
            backends.events.clone(),
            SweepSettings::from_config(&config),
        ));
        let refresher = config.proxy_cache.enabled.then(|| {
            Arc::new(ProxyCacheRefresher::new(
                backends.proxy_entries.clone(),
                service.clone(),
                backends.clock.clone(),
                &config.proxy_cache,
            ))
        });

        Ok(App {
            config,
            backends,
            service,
            coordinator: Arc::new(coordinator),
            ingestor,
            sweep,
            refresher,
            bug_versions,
        })
    }
}

/// A wired engine. `start()` once, then `spawn()` the loops.
pub struct App {
    config: SyncConfig,
    backends: Backends,
    service: Arc<TaskService>,
    coordinator: Arc<TaskCoordinator>,
    ingestor: Option<Arc<ChangeStreamIngestor>>,
    sweep: Arc<ReconciliationSweep>,
    refresher: Option<Arc<ProxyCacheRefresher>>,
    bug_versions: Arc<BugVersionCache>,
}

impl App {
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<TaskService> {
        &self.service
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    pub fn ingestor(&self) -> Option<&Arc<ChangeStreamIngestor>> {
        self.ingestor.as_ref()
    }

    pub fn sweep(&self) -> &Arc<ReconciliationSweep> {
        &self.sweep
    }

    pub fn refresher(&self) -> Option<&Arc<ProxyCacheRefresher>> {
        self.refresher.as_ref()
    }

    pub fn bug_versions(&self) -> &Arc<BugVersionCache> {
        &self.bug_versions
    }

    /// One-time startup work: legacy migration and the first bug-version
    /// load. A failed bug-version load is logged; overrides stay empty until
    /// the config package is next synced.
    pub async fn start(&self) -> Result<Option<Migration>, SyncError> {
        let migration = match &self.config.legacy {
            Some(legacy) => Some(
                migrate_legacy(
                    self.backends.registries.as_ref(),
                    self.backends.cursors.as_ref(),
                    legacy,
                    self.backends.clock.now(),
                )
                .await?,
            ),
            None => None,
        };

        if self.config.bug_versions.enabled
            && let Err(err) = self.bug_versions.refresh().await
        {
            warn!(error = %err, "initial bug-version load failed");
        }
        Ok(migration)
    }

    /// Spawns the coordinator loops and the periodic jobs.
    pub fn spawn(&self) -> WorkerGroup {
        let mut group = WorkerGroup::new();
        group.spawn_coordinators(self.config.worker.concurrency, self.coordinator.clone());
        group.spawn_periodic(self.sweep.clone(), self.config.reconcile.interval());
        if let Some(ingestor) = &self.ingestor {
            group.spawn_periodic(ingestor.clone(), self.config.changes_stream.poll_interval());
        }
        if let Some(refresher) = &self.refresher {
            group.spawn_periodic(refresher.clone(), self.config.proxy_cache.scan_interval());
        }
        info!(
            workers = self.config.worker.concurrency,
            loops = group.len(),
            task_types = ?self.config.worker.task_types,
            "engine started"
        );
        group
    }

    pub async fn status(&self) -> Result<StatusReport, SyncError> {
        StatusReport::collect(&self.service, &self.config.worker.task_types).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::coordinator::Tick;
    use crate::config::LegacyConfig;
    use crate::domain::{ExecuteError, Outcome, Registry, RegistryType, Task, TaskState};
    use crate::impls::ScriptedChangeSource;
    use crate::ports::{ChangeRecord, ChangeSource, SystemClock};
    use crate::typed::{SyncPackagePayload, UpdateProxyCachePayload};
    use async_trait::async_trait;
    use chrono::Utc;

    struct Synced;

    #[async_trait]
    impl Handler<SyncPackagePayload> for Synced {
        async fn handle(&self, _task: &Task, payload: SyncPackagePayload) -> Result<Outcome, ExecuteError> {
            Ok(Outcome::success().with_summary(format!("synced {}", payload.fullname)))
        }
    }

    struct Checked;

    #[async_trait]
    impl Handler<UpdateProxyCachePayload> for Checked {
        async fn handle(&self, _task: &Task, _payload: UpdateProxyCachePayload) -> Result<Outcome, ExecuteError> {
            Ok(Outcome::success())
        }
    }

    fn sources() -> (ChangeSources, Arc<ScriptedChangeSource>) {
        let source = Arc::new(ScriptedChangeSource::new(0u64));
        (ChangeSources::uniform(source.clone() as Arc<dyn ChangeSource>), source)
    }

    #[test]
    fn missing_executors_fail_the_build() {
        let (sources, _) = sources();
        let result = AppBuilder::new(SyncConfig::default(), Backends::in_memory(Arc::new(SystemClock)))
            .change_sources(sources)
            .register::<SyncPackagePayload, _>(Synced)
            .unwrap()
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingExecutors(missing)) if missing == vec![TaskType::UpdateProxyCache]
        ));
    }

    #[test]
    fn streaming_needs_change_sources() {
        let result = AppBuilder::new(SyncConfig::default(), Backends::in_memory(Arc::new(SystemClock)))
            .register::<SyncPackagePayload, _>(Synced)
            .unwrap()
            .register::<UpdateProxyCachePayload, _>(Checked)
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuildError::MissingChangeSources)));
    }

    #[test]
    fn exist_mode_needs_a_package_index() {
        let mut config = SyncConfig::default();
        config.changes_stream.sync_mode = SyncMode::Exist;
        let (sources, _) = sources();
        let result = AppBuilder::new(config, Backends::in_memory(Arc::new(SystemClock)))
            .change_sources(sources)
            .register::<SyncPackagePayload, _>(Synced)
            .unwrap()
            .register::<UpdateProxyCachePayload, _>(Checked)
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuildError::MissingPackageIndex)));
    }

    #[tokio::test]
    async fn change_feed_to_synced_packages_end_to_end() {
        let mut config = SyncConfig::default();
        config.worker.task_types = vec![TaskType::ChangesStream, TaskType::SyncPackage];
        config.legacy = Some(LegacyConfig {
            registry_name: "npm".into(),
            source_registry: "https://registry.npmjs.org".into(),
            changes_stream_url: "https://replicate.npmjs.com/_changes".into(),
            mode: crate::config::LegacyStreamMode::Streaming,
            source_is_cnpm: false,
            since: None,
        });
        let (sources, source) = sources();
        source
            .append(
                "npm",
                [ChangeRecord::new(1u64, "left-pad"), ChangeRecord::new(2u64, "lodash")],
            )
            .await;
        let backends = Backends::in_memory(Arc::new(SystemClock));
        let registries = backends.registries.clone();

        let app = AppBuilder::new(config, backends)
            .change_sources(sources)
            .register::<SyncPackagePayload, _>(Synced)
            .unwrap()
            .build()
            .unwrap();

        let migration = app.start().await.unwrap().unwrap();
        assert_eq!(migration.registry().registry_type, RegistryType::NpmStyle);
        let registry: Registry = registries.find_registry("npm").await.unwrap().unwrap();
        assert!(registry.created_at <= Utc::now());

        assert_eq!(app.ingestor().unwrap().schedule_streams().await.unwrap(), 1);

        let mut completed = Vec::new();
        while let Tick::Completed(task) = app.coordinator().tick().await.unwrap() {
            assert_eq!(task.state, TaskState::Success, "{task:?}");
            completed.push((task.task_type, task.target_name));
        }
        assert_eq!(
            completed,
            vec![
                (TaskType::ChangesStream, "npm_WORKER".to_string()),
                (TaskType::SyncPackage, "left-pad".to_string()),
                (TaskType::SyncPackage, "lodash".to_string()),
            ]
        );

        let status = app.status().await.unwrap();
        assert_eq!(status.total.success, 3);
        assert_eq!(status.total.active(), 0);
    }
}
