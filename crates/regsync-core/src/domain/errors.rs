//! Error types and their operational classification.
//!
//! Every error maps onto an [`ErrorKind`]. The coordinator only looks at the
//! kind: infrastructure errors make the loop back off, transient errors mark
//! the task failed and may schedule a retry, permanent errors mark it failed
//! for good.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worth retrying: timeouts, upstream unavailable.
    Transient,
    /// Retrying cannot help: malformed payload, unknown package, bugs.
    Permanent,
    /// A shared backend (store, queue, lock) is unavailable. Not a job failure.
    Infrastructure,
}

/// Task / registry / cache store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors from an upstream change feed.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("upstream request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("malformed change feed response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn request(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a task executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecuteError {
    kind: ErrorKind,
    message: String,
}

impl ExecuteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn timeout(deadline: Duration) -> Self {
        Self::transient(format!("execution exceeded deadline of {deadline:?}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient and infrastructure failures are retried; only permanent
    /// ones are not.
    pub fn is_retryable(&self) -> bool {
        self.kind != ErrorKind::Permanent
    }
}

impl From<SourceError> for ExecuteError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Request { .. } => Self::transient(err.to_string()),
            SourceError::Malformed(_) => Self::permanent(err.to_string()),
        }
    }
}

impl From<StoreError> for ExecuteError {
    fn from(err: StoreError) -> Self {
        Self {
            kind: ErrorKind::Infrastructure,
            message: err.to_string(),
        }
    }
}

impl From<SyncError> for ExecuteError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Execute(inner) => inner,
            other => Self {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error("registry not found: {0}")]
    RegistryNotFound(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
            SyncError::Store(_) => ErrorKind::Permanent,
            SyncError::Queue(_) | SyncError::Lock(_) => ErrorKind::Infrastructure,
            SyncError::Source(SourceError::Request { .. }) => ErrorKind::Transient,
            SyncError::Source(SourceError::Malformed(_)) => ErrorKind::Permanent,
            SyncError::Execute(e) => e.kind(),
            SyncError::RegistryNotFound(_) => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_classify_by_cause() {
        let net: ExecuteError = SourceError::request("http://r/_changes", "connection reset").into();
        assert_eq!(net.kind(), ErrorKind::Transient);

        let bad: ExecuteError = SourceError::Malformed("missing results".into()).into();
        assert_eq!(bad.kind(), ErrorKind::Permanent);
        assert!(!bad.is_retryable());
    }

    #[test]
    fn backend_errors_are_infrastructure() {
        let err = SyncError::from(QueueError::Unavailable("down".into()));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);

        let err = SyncError::from(StoreError::Unavailable("down".into()));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn timeout_is_transient() {
        let err = ExecuteError::timeout(Duration::from_secs(3));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.message().contains("deadline"));
    }

    #[test]
    fn execute_error_survives_sync_error_roundtrip() {
        let original = ExecuteError::permanent("bad payload");
        let back = ExecuteError::from(SyncError::from(original.clone()));
        assert_eq!(back, original);
    }
}
