//! MetricsSink port - メトリクスの出力先
//!
//! # 観測点
//! - queue depth gauge: submit / idle tick / dequeue
//! - active task gauge: attempt 開始・終了 / idle tick
//! - failure counter（task_type ごと）: 失敗した attempt ごと
//! - attempt duration（task_type ごと）: attempt 終了時
//!
//! キューのロック内から呼ばれることがあるので同期 API にしています。
//! 実装側は重い処理をしないこと。

use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    fn set_queue_depth(&self, depth: usize);

    fn set_active_tasks(&self, active: usize);

    fn record_failure(&self, task_type: &str);

    fn observe_duration(&self, task_type: &str, duration: Duration);
}

/// 何もしない（デフォルト）
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_queue_depth(&self, _depth: usize) {}

    fn set_active_tasks(&self, _active: usize) {}

    fn record_failure(&self, _task_type: &str) {}

    fn observe_duration(&self, _task_type: &str, _duration: Duration) {}
}
