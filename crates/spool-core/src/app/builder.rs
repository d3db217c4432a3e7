//! QueueBuilder - キューの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports の差し替え（テストでは FixedClock / InMemoryMetrics を注入）

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::config::QueueConfig;
use crate::domain::{Decider, DefaultDecider, Parameters};
use crate::error::SpoolError;
use crate::impls::{InMemoryDeliveryQueue, InMemoryTaskStore, JsonFileTaskStore};
use crate::ports::{
    Clock, DeliveryQueue, IdGenerator, MetricsSink, NoopMetrics, SystemClock, TaskStore,
    UlidGenerator,
};
use crate::queue::TaskQueue;
use crate::queue::scheduler::{Collaborators, Shared};
use crate::typed::{BlockingHandler, Handler, HandlerError, HandlerRegistry, TaskContext, TaskKind};

/// QueueBuilder は TaskQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue = QueueBuilder::new(QueueConfig::from_env()?)
///     .register::<Transcribe, _>(AsrHandler)
///     .register_blocking::<BurnSubtitles, _>(FfmpegBurner)
///     .expect_tasks(&["asr", "burn"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
///
/// # デフォルト
/// - store: `state_path` があれば JsonFileTaskStore、無ければ InMemoryTaskStore
/// - clock: SystemClock / metrics: NoopMetrics
/// - decider: config の retry 設定を使う DefaultDecider
pub struct QueueBuilder {
    config: QueueConfig,
    registry: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    pending: Option<Arc<dyn DeliveryQueue>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はキュー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] SpoolError),
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_tasks: None,
            store: None,
            pending: None,
            clock: None,
            ids: None,
            metrics: None,
            decider: None,
        }
    }

    /// async Handler を登録（同じ task_type は後勝ち）
    pub fn register<T: TaskKind, H: Handler<T> + 'static>(mut self, handler: H) -> Self {
        self.registry.register::<T, H>(handler);
        self
    }

    /// 同期 Handler を登録。blocking スレッドプールで実行される
    pub fn register_blocking<T: TaskKind, H: BlockingHandler<T>>(mut self, handler: H) -> Self {
        self.registry.register_blocking::<T, H>(handler);
        self
    }

    pub fn register_fn<F, Fut>(mut self, task_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Parameters, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(task_type, f);
        self
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn delivery_queue(mut self, pending: Arc<dyn DeliveryQueue>) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// # 検証
    /// - config の値が妥当か
    /// - expect_tasks() で設定された task_type が全て登録されているか
    pub fn build(self) -> Result<TaskQueue, BuildError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let store: Arc<dyn TaskStore> = match (self.store, &self.config.state_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonFileTaskStore::new(path)),
            (None, None) => Arc::new(InMemoryTaskStore::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(self.config.retry_policy())),
        };
        let pending: Arc<dyn DeliveryQueue> = match self.pending {
            Some(pending) => pending,
            None => Arc::new(InMemoryDeliveryQueue::new()),
        };
        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(NoopMetrics),
        };

        let shared = Shared::new(
            self.config,
            Collaborators {
                pending,
                registry: self.registry,
                store,
                clock,
                ids,
                metrics,
                decider,
            },
        );
        Ok(TaskQueue::from_shared(shared))
    }
}
