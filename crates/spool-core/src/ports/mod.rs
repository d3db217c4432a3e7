//! Ports - 抽象化レイヤー
//!
//! キューが外部（ファイル、時計、メトリクス基盤など）に触れる箇所を trait で切り出し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - メモリ上のタスク表が正本、TaskStore はそのスナップショット
//! - DeliveryQueue は task_id のみを流す
//! - Clock / IdGenerator はテストで差し替える

pub mod clock;
pub mod delivery_queue;
pub mod id_generator;
pub mod metrics;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::DeliveryQueue;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::metrics::{MetricsSink, NoopMetrics};
pub use self::task_store::{TaskStore, TaskTable};
