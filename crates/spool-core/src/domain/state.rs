//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Queued -> Processing -> Completed
/// - Queued -> Processing -> Retrying -> Queued (loop until max_retries)
/// - Queued -> Processing -> Failed (retries exhausted, no handler, bad parameters)
/// - Queued -> Cancelled
///
/// A Processing task cannot be cancelled; it runs to completion or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending queue.
    Queued,

    /// An attempt is running.
    Processing,

    /// Handler returned a result.
    Completed,

    /// Failed permanently.
    Failed,

    /// Cancelled before it started.
    Cancelled,

    /// Last attempt failed; waiting for the backoff timer to re-enqueue it.
    Retrying,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Should this task be put back on the pending queue after a restart?
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Processing | TaskStatus::Retrying
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::queued(TaskStatus::Queued, false, true)]
    #[case::processing(TaskStatus::Processing, false, true)]
    #[case::retrying(TaskStatus::Retrying, false, true)]
    #[case::completed(TaskStatus::Completed, true, false)]
    #[case::failed(TaskStatus::Failed, true, false)]
    #[case::cancelled(TaskStatus::Cancelled, true, false)]
    fn terminal_and_recoverable_are_disjoint(
        #[case] status: TaskStatus,
        #[case] terminal: bool,
        #[case] recoverable: bool,
    ) {
        assert_eq!(status.is_terminal(), terminal);
        assert_eq!(status.is_recoverable(), recoverable);
    }

    #[test]
    fn serializes_as_lowercase_names() {
        let s = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        assert_eq!(TaskStatus::Retrying.to_string(), "retrying");
    }
}
