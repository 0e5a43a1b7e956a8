//! Ports: traits for the shared backends and external collaborators.
//!
//! The task store is the source of truth. The dedup queue and the lock live
//! in a shared fast store and carry no authoritative state. Caches can be
//! rebuilt at any time.

pub mod caches;
pub mod change_source;
pub mod clock;
pub mod dedup_queue;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod lock;
pub mod registry_store;
pub mod task_store;

pub use self::caches::{BugVersionSource, ManifestCache, PackageIndex, ProxyCacheStore};
pub use self::change_source::{ChangeRecord, ChangeSource, HttpClient};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dedup_queue::DedupQueue;
pub use self::event_sink::EventSink;
pub use self::executor::{SyncExecutor, TaskObserver};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock::DistributedLock;
pub use self::registry_store::{CursorStore, RegistryStore};
pub use self::task_store::TaskStore;
