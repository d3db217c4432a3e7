//! InMemoryMetrics - 値を保持するだけの MetricsSink
//!
//! gauge は AtomicUsize、task_type ごとの counter / duration は Mutex<HashMap> で持ち、
//! `snapshot()` で読み出します。エクスポータ（Prometheus など）を繋ぐ場合は
//! この snapshot を定期的に読めばよい。

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::ports::MetricsSink;

/// attempt 所要時間の集計（histogram の代わりの最小形）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl DurationStats {
    fn observe(&mut self, d: Duration) {
        self.count += 1;
        self.total += d;
        self.max = self.max.max(d);
    }

    pub fn mean(&self) -> Option<Duration> {
        u32::try_from(self.count)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.total / n)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub active_tasks: usize,
    /// 観測された active_tasks の最大値
    pub peak_active_tasks: usize,
    pub failures: HashMap<String, u64>,
    pub durations: HashMap<String, DurationStats>,
}

#[derive(Default)]
struct PerType {
    failures: HashMap<String, u64>,
    durations: HashMap<String, DurationStats>,
}

#[derive(Default)]
pub struct InMemoryMetrics {
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    peak_active_tasks: AtomicUsize,
    per_type: Mutex<PerType>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_type = self.per_type.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
            peak_active_tasks: self.peak_active_tasks.load(Ordering::SeqCst),
            failures: per_type.failures.clone(),
            durations: per_type.durations.clone(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::SeqCst);
    }

    fn set_active_tasks(&self, active: usize) {
        self.active_tasks.store(active, Ordering::SeqCst);
        self.peak_active_tasks.fetch_max(active, Ordering::SeqCst);
    }

    fn record_failure(&self, task_type: &str) {
        let mut per_type = self.per_type.lock().unwrap_or_else(|e| e.into_inner());
        *per_type.failures.entry(task_type.to_string()).or_default() += 1;
    }

    fn observe_duration(&self, task_type: &str, duration: Duration) {
        let mut per_type = self.per_type.lock().unwrap_or_else(|e| e.into_inner());
        per_type
            .durations
            .entry(task_type.to_string())
            .or_default()
            .observe(duration);
    }
}
