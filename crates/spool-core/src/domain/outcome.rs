//! Outcome model: the result of one attempt.
//!
//! This module does not assume queues or persistence. It only classifies
//! what happened so the decider can choose between retry and give-up.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an attempt did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No handler registered for the task type.
    Unroutable,

    /// Parameters did not match the handler's schema.
    InvalidParameters,

    /// Handler returned an error.
    Handler,

    /// Attempt exceeded its timeout.
    Timeout,

    /// Handler panicked.
    Panicked,
}

impl FailureKind {
    /// Routing and schema errors are deterministic; retrying cannot help.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Handler | FailureKind::Timeout | FailureKind::Panicked
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed(serde_json::Value),
    Failed(AttemptFailure),
}

impl AttemptOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        AttemptOutcome::Failed(AttemptFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Completed(_))
    }
}
