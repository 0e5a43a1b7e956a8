//! TaskPayload trait and the payloads of the core task types.
//!
//! # Trait bounds
//! - `Serialize` / `DeserializeOwned`: payloads are stored as JSON on the task
//! - `Send + Sync + 'static`: handlers run on spawned tokio tasks

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{NewTask, ProxyCacheFileType, TaskType};

/// Binds a payload struct to the task type that carries it.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ChangesStreamPayload { registry_name: String }
///
/// impl TaskPayload for ChangesStreamPayload {
///     const TASK_TYPE: TaskType = TaskType::ChangesStream;
/// }
/// ```
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TASK_TYPE: TaskType;

    /// Creation request for a task carrying this payload.
    fn into_new_task(self, target_name: impl Into<String>) -> Result<NewTask, serde_json::Error> {
        let payload = serde_json::to_value(&self)?;
        Ok(NewTask::new(Self::TASK_TYPE, target_name, payload))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPackagePayload {
    pub fullname: String,

    /// Registry the change came from.
    pub registry_name: String,

    /// Free-form hints for the sync (what triggered it).
    #[serde(default)]
    pub tips: Option<String>,

    #[serde(default)]
    pub skip_dependencies: bool,
}

impl SyncPackagePayload {
    pub fn new(fullname: impl Into<String>, registry_name: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
            registry_name: registry_name.into(),
            tips: None,
            skip_dependencies: false,
        }
    }

    pub fn with_tips(mut self, tips: impl Into<String>) -> Self {
        self.tips = Some(tips.into());
        self
    }
}

impl TaskPayload for SyncPackagePayload {
    const TASK_TYPE: TaskType = TaskType::SyncPackage;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProxyCachePayload {
    pub fullname: String,
    pub file_type: ProxyCacheFileType,
    #[serde(default)]
    pub version: Option<String>,
}

impl TaskPayload for UpdateProxyCachePayload {
    const TASK_TYPE: TaskType = TaskType::UpdateProxyCache;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesStreamPayload {
    pub registry_name: String,
}

impl TaskPayload for ChangesStreamPayload {
    const TASK_TYPE: TaskType = TaskType::ChangesStream;
}
