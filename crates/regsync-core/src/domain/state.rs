//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Waiting -> Processing (claim)
/// - Processing -> Success | Error (completion)
/// - Processing -> Waiting (requeue after lock contention or a stale claim)
///
/// Success and Error are terminal. A failed task is never revived; retries
/// are new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    Processing,
    Success,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }

    /// Waiting or Processing. At most one active task may exist per
    /// `(task_type, target_name)`.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Waiting, Processing) | (Processing, Success) | (Processing, Error) | (Processing, Waiting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Processing => "processing",
            TaskState::Success => "success",
            TaskState::Error => "error",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a claimed task goes back to Waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    /// The coordinator could not take the task's lock. The attempt did not
    /// run, so it is refunded.
    LockContention,

    /// The claiming worker stopped updating the task and its lock expired.
    /// The attempt counts.
    Stale,
}

/// Number of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub waiting: usize,
    pub processing: usize,
    pub success: usize,
    pub error: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Waiting => self.waiting += 1,
            TaskState::Processing => self.processing += 1,
            TaskState::Success => self.success += 1,
            TaskState::Error => self.error += 1,
        }
    }

    pub fn active(&self) -> usize {
        self.waiting + self.processing
    }

    pub fn total(&self) -> usize {
        self.active() + self.success + self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(TaskState::Waiting, TaskState::Processing)]
    #[case::succeed(TaskState::Processing, TaskState::Success)]
    #[case::fail(TaskState::Processing, TaskState::Error)]
    #[case::requeue(TaskState::Processing, TaskState::Waiting)]
    fn allowed_transitions(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_processing(TaskState::Waiting, TaskState::Success)]
    #[case::revive_error(TaskState::Error, TaskState::Waiting)]
    #[case::revive_success(TaskState::Success, TaskState::Processing)]
    #[case::flip_terminal(TaskState::Success, TaskState::Error)]
    #[case::double_claim(TaskState::Processing, TaskState::Processing)]
    fn rejected_transitions(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states_are_not_active() {
        assert!(TaskState::Waiting.is_active());
        assert!(TaskState::Processing.is_active());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }
}
