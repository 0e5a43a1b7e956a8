//! Handler<P>: typed executors, erased into `SyncExecutor`.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::payload::TaskPayload;
use crate::domain::{ExecuteError, Outcome, Task};
use crate::ports::SyncExecutor;

/// Executes tasks whose payload decodes to `P`.
///
/// ```ignore
/// struct SyncPackageHandler;
///
/// #[async_trait]
/// impl Handler<SyncPackagePayload> for SyncPackageHandler {
///     async fn handle(&self, task: &Task, payload: SyncPackagePayload) -> Result<Outcome, ExecuteError> {
///         Ok(Outcome::success())
///     }
/// }
/// ```
///
/// `Handler<SyncPackagePayload>` only ever sees sync payloads; the pairing
/// is checked at compile time.
#[async_trait]
pub trait Handler<P: TaskPayload>: Send + Sync {
    async fn handle(&self, task: &Task, payload: P) -> Result<Outcome, ExecuteError>;
}

/// Wraps a `Handler<P>` as an object-safe `SyncExecutor`.
pub struct TypedExecutor<P: TaskPayload, H: Handler<P>> {
    handler: H,
    _marker: PhantomData<fn() -> P>,
}

impl<P: TaskPayload, H: Handler<P>> TypedExecutor<P, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P: TaskPayload, H: Handler<P>> SyncExecutor for TypedExecutor<P, H> {
    /// Payloads that do not decode are a permanent failure.
    async fn execute(&self, task: &Task) -> Result<Outcome, ExecuteError> {
        if task.task_type != P::TASK_TYPE {
            return Err(ExecuteError::permanent(format!(
                "{} handler got a {} task",
                P::TASK_TYPE,
                task.task_type
            )));
        }
        let payload: P = task.decode_payload()?;
        self.handler.handle(task, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, NewTask, TaskId, TaskType};
    use crate::typed::payload::ChangesStreamPayload;
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    struct EchoHandler;

    #[async_trait]
    impl Handler<ChangesStreamPayload> for EchoHandler {
        async fn handle(&self, _task: &Task, payload: ChangesStreamPayload) -> Result<Outcome, ExecuteError> {
            Ok(Outcome::success().with_summary(payload.registry_name))
        }
    }

    fn task(task_type: TaskType, payload: serde_json::Value) -> Task {
        Task::from_request(
            TaskId::from_ulid(Ulid::new()),
            NewTask::new(task_type, "npm_WORKER", payload),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn decodes_and_dispatches() {
        let executor = TypedExecutor::new(EchoHandler);
        let outcome = executor
            .execute(&task(TaskType::ChangesStream, json!({"registry_name": "npm"})))
            .await
            .unwrap();
        assert_eq!(outcome.summary.as_deref(), Some("npm"));
    }

    #[tokio::test]
    async fn bad_payload_is_permanent() {
        let executor = TypedExecutor::new(EchoHandler);
        let err = executor
            .execute(&task(TaskType::ChangesStream, json!({"registry": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn wrong_task_type_is_permanent() {
        let executor = TypedExecutor::new(EchoHandler);
        let err = executor
            .execute(&task(TaskType::SyncPackage, json!({"registry_name": "npm"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
