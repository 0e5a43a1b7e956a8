//! App: the engine, assembled from ports.
//!
//! - **TaskService**: create tasks and announce them on the dedup queue
//! - **TaskCoordinator**: claim -> lock -> execute -> record -> release
//! - **ChangeStreamIngestor**: upstream change feeds -> sync tasks
//! - **ReconciliationSweep**: requeue abandoned tasks, re-push lost queue items
//! - **CacheInvalidator** / **BugVersionCache** / **ProxyCacheRefresher**:
//!   read-side cache coherence
//! - **AppBuilder**: wiring and startup validation

pub mod bug_versions;
pub mod builder;
pub mod coordinator;
pub mod ingestor;
pub mod invalidator;
pub mod migration;
pub mod proxy_cache;
pub mod service;
pub mod status;
pub mod sweep;
pub mod worker;

pub use self::bug_versions::BugVersionCache;
pub use self::builder::{App, AppBuilder, Backends, BuildError};
pub use self::coordinator::{CoordinatorSettings, TaskCoordinator, Tick};
pub use self::ingestor::{ChangeStreamIngestor, ChangesStreamHandler, IngestReport};
pub use self::invalidator::CacheInvalidator;
pub use self::migration::{Migration, migrate_legacy};
pub use self::proxy_cache::{ProxyCacheRefresher, RefreshReport};
pub use self::service::TaskService;
pub use self::status::{StatusReport, TypeStatus};
pub use self::sweep::{ReconciliationSweep, SweepReport, SweepSettings};
pub use self::worker::{PeriodicJob, WorkerGroup};
