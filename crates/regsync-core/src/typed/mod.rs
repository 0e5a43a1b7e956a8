//! Typed task API.
//!
//! Two layers:
//! - **typed**: `TaskPayload`, `Handler<P>`; the payload/handler pairing is
//!   checked by the compiler
//! - **erased**: `SyncExecutor` trait objects the coordinator dispatches to

pub mod handler;
pub mod payload;
pub mod registry;

pub use self::handler::{Handler, TypedExecutor};
pub use self::payload::{ChangesStreamPayload, SyncPackagePayload, TaskPayload, UpdateProxyCachePayload};
pub use self::registry::{ExecutorRegistry, RegistryError};
