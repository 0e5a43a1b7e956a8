//! Implementations of the ports.
//!
//! The in-memory backends serve tests, the demo binary and single-process
//! deployments. Shared deployments plug networked backends into the same
//! traits.

pub mod feeds;
pub mod inmem_caches;
pub mod inmem_lock;
pub mod inmem_queue;
pub mod inmem_registry;
pub mod inmem_task_store;
pub mod tracing_sink;

pub use self::feeds::{
    ChangeSources, LegacyChangeSource, NpmChangeSource, ScriptedChangeSource, SelfHostedChangeSource,
};
pub use self::inmem_caches::{
    InMemoryManifestCache, InMemoryPackageIndex, InMemoryProxyCacheStore, StaticBugVersionSource,
};
pub use self::inmem_lock::InMemoryLock;
pub use self::inmem_queue::InMemoryDedupQueue;
pub use self::inmem_registry::InMemoryRegistryStore;
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::tracing_sink::{RecordingEventSink, TracingEventSink};
