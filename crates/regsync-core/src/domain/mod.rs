//! Domain model: tasks, registries, cursors, caches, errors.

pub mod bug_version;
pub mod cursor;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod proxy_cache;
pub mod registry;
pub mod retry;
pub mod state;
pub mod task;

pub use bug_version::{BugVersionOverride, BugVersionTable};
pub use cursor::{ChangeFeedCursor, SinceToken};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, ExecuteError, LockError, QueueError, SourceError, StoreError, SyncError};
pub use events::{TaskEvent, TaskEventKind};
pub use ids::{LockToken, TaskId};
pub use outcome::Outcome;
pub use proxy_cache::{ProxyCacheEntry, ProxyCacheFileType};
pub use registry::{Registry, RegistryRouter, RegistryType, ScopeConflict, scope_of};
pub use retry::RetryPolicy;
pub use state::{RequeueReason, TaskCounts, TaskState};
pub use task::{Enqueued, NewTask, Task, TaskType, lock_name};
