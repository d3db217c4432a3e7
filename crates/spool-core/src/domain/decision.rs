//! Decision model: what to do after a failed attempt.
//!
//! This module defines the Decision type (what to do next) and the Decider trait
//! (how to determine the next action based on task state and failure).

use std::time::Duration;

use super::outcome::AttemptFailure;
use super::task::Task;
use crate::queue::RetryPolicy;

/// The next action to take for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Re-enqueue the task after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up.
    MarkFailed { reason: String },
}

/// Deciders are pure functions: given the current state and the failure,
/// they return the next action without side effects. Applying the decision
/// (updating the Task, arming the timer) is the queue's job.
pub trait Decider: Send + Sync {
    /// `task` is the record as it was when the attempt ran (`retries` not yet bumped).
    fn decide(&self, task: &Task, failure: &AttemptFailure) -> Decision;
}

/// Retry budget + exponential backoff:
/// - Non-retryable failures (no handler, bad parameters) fail immediately
/// - Retry while retries < max_retries
/// - Delay from RetryPolicy, indexed by the retry about to be consumed
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &Task, failure: &AttemptFailure) -> Decision {
        if !failure.kind.is_retryable() {
            return Decision::MarkFailed {
                reason: format!("{:?} failures are not retried", failure.kind),
            };
        }
        if task.retries >= task.max_retries {
            return Decision::MarkFailed {
                reason: format!("Max retries reached: {}/{}", task.retries, task.max_retries),
            };
        }
        let next_retry = task.retries + 1;
        let delay = self.retry_policy.next_delay(next_retry);
        Decision::Retry {
            delay,
            reason: format!(
                "Retry {}/{} after {:?}",
                next_retry, task.max_retries, delay
            ),
        }
    }
}
