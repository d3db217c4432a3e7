use serde::{Deserialize, Serialize};

/// Point-in-time view of the queue, as returned by `TaskQueue::queue_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Ids waiting in the pending queue. Includes ids of tasks cancelled
    /// after submission until the worker pops and skips them.
    pub pending_count: usize,
    /// Attempts currently running.
    pub active_count: usize,
    /// Tasks in the table, any status.
    pub total_count: usize,
    pub concurrency_cap: usize,
    pub worker_running: bool,
}
