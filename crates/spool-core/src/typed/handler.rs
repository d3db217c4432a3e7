//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>, BlockingHandler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)
//! - 同期処理は spawn_blocking へ逃がす（ワーカーループを止めない）

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::TaskContext;
use super::task::TaskKind;
use crate::domain::Parameters;

/// Handler の失敗
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// parameters が Handler の型に decode できない（リトライしない）
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// 処理の失敗（リトライ対象）
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

/// Handler は Task を実行して結果 (JSON) を返す
///
/// # 使用例
/// ```ignore
/// struct EchoHandler;
///
/// #[async_trait]
/// impl Handler<Echo> for EchoHandler {
///     async fn handle(&self, task: Echo, _ctx: TaskContext) -> Result<Value, HandlerError> {
///         Ok(json!({ "value": task.value }))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: TaskKind>: Send + Sync {
    async fn handle(&self, task: T, ctx: TaskContext) -> Result<Value, HandlerError>;
}

/// 同期 Handler（ffmpeg 呼び出しなど）。常に blocking スレッドプールで実行される
///
/// タイムアウトしても止められないので、長い処理は `ctx.is_cancelled()` を見て自分で抜けること。
pub trait BlockingHandler<T: TaskKind>: Send + Sync + 'static {
    fn handle(&self, task: T, ctx: TaskContext) -> Result<Value, HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// 各 Handler を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, params: Parameters, ctx: TaskContext)
    -> Result<Value, HandlerError>;

    fn task_type(&self) -> &str;
}

fn decode<T: TaskKind>(params: Parameters) -> Result<T, HandlerError> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| HandlerError::InvalidParameters(format!("{}: {e}", T::TYPE)))
}

pub struct TypedHandler<T: TaskKind, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: TaskKind, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskKind, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        params: Parameters,
        ctx: TaskContext,
    ) -> Result<Value, HandlerError> {
        let task: T = decode(params)?;
        self.handler.handle(task, ctx).await
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

pub struct BlockingTypedHandler<T: TaskKind, H: BlockingHandler<T>> {
    handler: Arc<H>,
    _marker: PhantomData<T>,
}

impl<T: TaskKind, H: BlockingHandler<T>> BlockingTypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskKind, H: BlockingHandler<T>> DynHandler for BlockingTypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        params: Parameters,
        ctx: TaskContext,
    ) -> Result<Value, HandlerError> {
        let task: T = decode(params)?;
        let handler = Arc::clone(&self.handler);
        match tokio::task::spawn_blocking(move || handler.handle(task, ctx)).await {
            Ok(result) => result,
            // panic は attempt runner 側で「Panicked」として扱うのでそのまま伝播
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(HandlerError::failed(format!("blocking handler aborted: {e}"))),
        }
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

/// 型なし Handler（parameters をそのまま受け取るクロージャ）
pub struct FnHandler<F> {
    task_type: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(task_type: impl Into<String>, f: F) -> Self {
        Self {
            task_type: task_type.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(Parameters, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle_dyn(
        &self,
        params: Parameters,
        ctx: TaskContext,
    ) -> Result<Value, HandlerError> {
        (self.f)(params, ctx).await
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }
}
