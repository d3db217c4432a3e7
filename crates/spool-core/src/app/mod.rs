//! App - アプリケーション層
//!
//! ports と queue を組み合わせてキューを組み立て、バックグラウンドループを動かします。
//!
//! # 主要コンポーネント
//! - **QueueBuilder**: キューの構築とワイヤリング（起動時検証つき）
//! - **worker_loop**: タスク実行ループ（pop→claim→spawn attempt）
//! - **gc_loop**: 古いタスクの定期削除

pub mod builder;
pub(crate) mod gc_loop;
pub(crate) mod worker_loop;

pub use self::builder::{BuildError, QueueBuilder};
