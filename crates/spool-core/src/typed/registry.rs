//! HandlerRegistry - task_type → Handler の対応表
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（ワーカーが attempt ごとに clone して持ち出す）
//!
//! 同じ task_type を再登録した場合は後勝ち（warn ログを出す）。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::context::TaskContext;
use super::handler::{
    BlockingHandler, BlockingTypedHandler, DynHandler, FnHandler, Handler, HandlerError,
    TypedHandler,
};
use super::task::TaskKind;
use crate::domain::Parameters;

/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<Transcribe, _>(AsrHandler);
/// registry.register_blocking::<BurnSubtitles, _>(FfmpegBurner);
///
/// let handler = registry.get("asr");
/// ```
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TaskKind, H: Handler<T> + 'static>(&mut self, handler: H) {
        self.insert(Arc::new(TypedHandler::new(handler)));
    }

    pub fn register_blocking<T: TaskKind, H: BlockingHandler<T>>(&mut self, handler: H) {
        self.insert(Arc::new(BlockingTypedHandler::new(handler)));
    }

    /// 型なしのクロージャを登録（parameters はそのまま渡る）
    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Parameters, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.insert(Arc::new(FnHandler::new(task_type, f)));
    }

    fn insert(&mut self, handler: Arc<dyn DynHandler>) {
        let task_type = handler.task_type().to_string();
        if self.handlers.insert(task_type.clone(), handler).is_some() {
            warn!(task_type = %task_type, "handler re-registered, replacing previous one");
        }
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// ソート済み
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
