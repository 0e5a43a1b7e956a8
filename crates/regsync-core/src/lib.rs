//! regsync-core
//!
//! Synchronization and cache-coherence engine of a package registry mirror.
//!
//! # Modules
//! - **domain**: tasks and their state machine, registries and scope routing,
//!   cursors, cache entries, errors
//! - **ports**: traits for the shared backends (task store, dedup queue, lock)
//!   and external collaborators (change feeds, executors, caches)
//! - **impls**: in-memory backends and the change-feed dialect adapters
//! - **typed**: typed task payloads and handlers
//! - **app**: coordinator, ingestor, sweep, cache invalidation, wiring
//! - **config**: TOML configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{App, AppBuilder, Backends, BuildError};
pub use crate::config::SyncConfig;
pub use crate::domain::{ErrorKind, SyncError, Task, TaskState, TaskType};
