//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryDeliveryQueue**: プロセス内の FIFO 配送キュー
//! - **JsonFileTaskStore**: タスク表を JSON ファイル 1 つに保存
//! - **InMemoryTaskStore**: テスト・揮発デプロイ用
//! - **InMemoryMetrics**: 値を保持するだけの MetricsSink

pub mod inmem_delivery;
pub mod json_store;
pub mod memory_store;
pub mod metrics;

pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::json_store::JsonFileTaskStore;
pub use self::memory_store::InMemoryTaskStore;
pub use self::metrics::{DurationStats, InMemoryMetrics, MetricsSnapshot};
