//! Typed - 型付き Task API
//!
//! このモジュールは task_type の typo を型で排除し、
//! パラメータ型をそのまま「型ごとのスキーマ」として扱います。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskKind` trait, `Handler<T>` / `BlockingHandler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::context::{ProgressReporter, TaskContext};
pub use self::handler::{
    BlockingHandler, BlockingTypedHandler, DynHandler, FnHandler, Handler, HandlerError,
    TypedHandler,
};
pub use self::registry::HandlerRegistry;
pub use self::task::{TaskKind, to_parameters};
