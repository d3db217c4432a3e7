//! Submission inputs.
//!
//! Parameters are an open-ended JSON object so handlers can evolve their
//! argument shape without touching the queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named arguments passed verbatim to the handler.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Per-task overrides for the retry budget and attempt timeout.
/// Fields left as `None` fall back to the queue configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Maximum number of retries after the first attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Wall-clock limit of one attempt.
    #[serde(default, with = "crate::domain::task::opt_duration_ms")]
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
