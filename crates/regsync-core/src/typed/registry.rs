//! ExecutorRegistry: task type -> executor.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Handler, TypedExecutor};
use super::payload::TaskPayload;
use crate::domain::TaskType;
use crate::ports::SyncExecutor;

/// Executors by task type. At most one per type.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn SyncExecutor>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("executor for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registers a typed handler for `P::TASK_TYPE`.
    pub fn register<P: TaskPayload, H: Handler<P> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_executor(P::TASK_TYPE, Arc::new(TypedExecutor::new(handler)))
    }

    /// Registers an untyped executor, for handlers that read the raw payload.
    pub fn register_executor(
        &mut self,
        task_type: TaskType,
        executor: Arc<dyn SyncExecutor>,
    ) -> Result<(), RegistryError> {
        if self.executors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.executors.insert(task_type, executor);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn SyncExecutor>> {
        self.executors.get(&task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }
}
