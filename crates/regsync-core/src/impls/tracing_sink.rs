//! `EventSink` that writes lifecycle events as `tracing` events.

use tracing::{error, info, warn};

use crate::domain::{TaskEvent, TaskEventKind};
use crate::ports::EventSink;

/// Failures are `warn`, exhausted retries are `error` (the alertable case),
/// everything else `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TaskEvent) {
        let kind = event.kind.as_str();
        let task_id = event.task_id.to_string();
        let detail = event.detail.as_deref().unwrap_or("");
        match event.kind {
            TaskEventKind::RetriesExhausted => error!(
                event = kind,
                %task_id,
                task_type = %event.task_type,
                target = %event.target_name,
                attempts = event.attempts,
                detail,
                "task retries exhausted"
            ),
            TaskEventKind::Error | TaskEventKind::Requeued => warn!(
                event = kind,
                %task_id,
                task_type = %event.task_type,
                target = %event.target_name,
                attempts = event.attempts,
                detail,
                "task {kind}"
            ),
            _ => info!(
                event = kind,
                %task_id,
                task_type = %event.task_type,
                target = %event.target_name,
                attempts = event.attempts,
                detail,
                "task {kind}"
            ),
        }
    }
}

/// Keeps every event in memory. For tests and for inspecting a run.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<TaskEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
