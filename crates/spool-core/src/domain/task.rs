//! Task record: identity, inputs, and execution state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::submit::Parameters;
use super::state::TaskStatus;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// One submitted unit of work.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - The pending queue holds TaskId only.
/// - All state transitions happen through the methods below, under the queue lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Selects the handler.
    #[serde(rename = "type")]
    pub task_type: String,

    pub parameters: Parameters,
    pub status: TaskStatus,

    /// 0-100, written by the running handler. Advisory only.
    pub progress: u8,

    /// Set only on Completed.
    pub result: Option<serde_json::Value>,

    /// Last failure message (Failed or Retrying).
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Retries consumed so far. Never exceeds `max_retries`.
    pub retries: u32,
    pub max_retries: u32,

    /// Limit for a single attempt.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Task {
    pub fn new(
        id: TaskId,
        task_type: impl Into<String>,
        parameters: Parameters,
        max_retries: u32,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            parameters,
            status: TaskStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            retries: 0,
            max_retries,
            timeout,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 1-indexed number of the attempt that is running (or would run next).
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    /// Queued -> Processing.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, TaskStatus::Queued);
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
    }

    /// Processing -> Completed.
    pub fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    /// Processing -> Failed.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// Processing -> Retrying. Consumes one retry.
    pub fn schedule_retry(&mut self, error: String) {
        debug_assert!(self.retries < self.max_retries);
        self.status = TaskStatus::Retrying;
        self.retries += 1;
        self.error = Some(error);
    }

    /// Move back to Queued: after a backoff, or after a restart found the
    /// task Processing/Retrying (an in-flight attempt is presumed lost).
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Queued;
    }

    /// Queued -> Cancelled. Returns false (and changes nothing) for any other status.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Queued {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        true
    }

    pub fn set_progress(&mut self, percent: u8) {
        self.progress = percent.min(100);
    }

    /// Terminal and settled before `now - max_age`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if !self.is_terminal() {
            return false;
        }
        let Some(completed_at) = self.completed_at else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        now.signed_duration_since(completed_at) > max_age
    }
}

/// `Duration` <-> integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// `Option<Duration>` <-> optional integer milliseconds.
pub(crate) mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::duration_ms::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
