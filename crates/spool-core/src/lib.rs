//! spool-core
//!
//! 長時間かかるジョブ（文字起こし・字幕焼き込みなど）のための
//! 同時実行数制限・リトライ・タイムアウト・クラッシュ復旧つきタスクキュー。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, submit options, outcome, decision）
//! - **ports**: 抽象化レイヤー（TaskStore, DeliveryQueue, Clock, IdGenerator, MetricsSink）
//! - **impls**: 実装（InMemoryDeliveryQueue, JsonFileTaskStore, InMemoryTaskStore, InMemoryMetrics）
//! - **typed**: 型付き Task API（TaskKind, Handler, BlockingHandler, HandlerRegistry）
//! - **queue**: スケジューラ本体（TaskQueue, attempt runner, RetryPolicy）
//! - **app**: 組み立てとバックグラウンドループ（QueueBuilder, worker_loop, gc_loop）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod typed;

pub use self::app::{BuildError, QueueBuilder};
pub use self::config::QueueConfig;
pub use self::domain::{Parameters, SubmitOptions, Task, TaskId, TaskStatus};
pub use self::error::SpoolError;
pub use self::observability::QueueStatus;
pub use self::queue::{RetryPolicy, TaskQueue};
pub use self::typed::{BlockingHandler, Handler, HandlerError, TaskContext, TaskKind};
