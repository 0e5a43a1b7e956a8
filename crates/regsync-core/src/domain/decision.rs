//! What to do after a failed execution.

use super::errors::{ErrorKind, ExecuteError};
use super::task::Task;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Create a fresh Waiting task continuing the retry chain.
    Retry { reason: String },

    /// Leave the task in Error.
    GiveUp {
        reason: String,
        /// True when a retryable failure ran out of attempts. This is the
        /// case operators get alerted on.
        exhausted: bool,
    },
}

/// Decides whether a failure is retried. Pure: the coordinator applies the
/// decision.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &Task, error: &ExecuteError) -> Decision;
}

/// Retries transient failures while `attempts < max_attempts`.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    max_attempts: u32,
}

impl DefaultDecider {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &Task, error: &ExecuteError) -> Decision {
        if error.kind() == ErrorKind::Permanent {
            return Decision::GiveUp {
                reason: format!("permanent failure: {}", error.message()),
                exhausted: false,
            };
        }
        if task.attempts >= self.max_attempts {
            return Decision::GiveUp {
                reason: format!("max attempts reached: {}/{}", task.attempts, self.max_attempts),
                exhausted: true,
            };
        }
        Decision::Retry {
            reason: format!("retry attempt {}/{}", task.attempts + 1, self.max_attempts),
        }
    }
}
