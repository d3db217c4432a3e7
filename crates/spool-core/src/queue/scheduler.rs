//! TaskQueue - タスク表・配送キュー・ワーカーループを束ねるハンドル
//!
//! # 状態の持ち方
//! - タスク表と active 数は 1 つの `tokio::sync::Mutex<QueueState>` が正本
//! - 配送キュー (DeliveryQueue) は TaskId だけを流す
//! - 保存は persist_lock を取ってから snapshot を clone する。
//!   新しい snapshot が古い snapshot で上書きされず、ファイル I/O は状態ロックの外で行われる
//!
//! # ライフサイクル
//! `QueueBuilder::build()` → `start()` → (submit / get_task / cancel ...) → `stop()`

use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{gc_loop, worker_loop};
use crate::config::QueueConfig;
use crate::domain::{Decider, Parameters, SubmitOptions, Task, TaskId, TaskStatus};
use crate::error::SpoolError;
use crate::observability::QueueStatus;
use crate::ports::{Clock, DeliveryQueue, IdGenerator, MetricsSink, TaskStore, TaskTable};
use crate::typed::{HandlerRegistry, TaskKind, to_parameters};

/// 状態ロックで守られる部分
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub tasks: TaskTable,
    /// 実行中の attempt 数。常に `concurrency_cap` 以下
    pub active: usize,
}

/// ワーカーループ・attempt・タイマーが共有する本体
pub(crate) struct Shared {
    pub state: Mutex<QueueState>,
    pub pending: Arc<dyn DeliveryQueue>,
    pub registry: HandlerRegistry,
    pub store: Arc<dyn TaskStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub metrics: Arc<dyn MetricsSink>,
    pub decider: Arc<dyn Decider>,
    pub config: QueueConfig,
    /// attempt が終わるたびに notify_one
    pub slot_freed: Notify,
    persist_lock: Mutex<()>,
    /// 現在の run の停止トークン。start() のたびに差し替える
    run_token: std::sync::Mutex<CancellationToken>,
}

pub(crate) struct Collaborators {
    pub pending: Arc<dyn DeliveryQueue>,
    pub registry: HandlerRegistry,
    pub store: Arc<dyn TaskStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub metrics: Arc<dyn MetricsSink>,
    pub decider: Arc<dyn Decider>,
}

impl Shared {
    pub(crate) fn new(config: QueueConfig, parts: Collaborators) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            pending: parts.pending,
            registry: parts.registry,
            store: parts.store,
            clock: parts.clock,
            ids: parts.ids,
            metrics: parts.metrics,
            decider: parts.decider,
            config,
            slot_freed: Notify::new(),
            persist_lock: Mutex::new(()),
            run_token: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// タスク表をまるごと保存。失敗はログのみ
    pub(crate) async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.lock().await.tasks.clone();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, tasks = snapshot.len(), "failed to persist task table");
        }
    }

    pub(crate) async fn publish_gauges(&self) {
        let active = self.state.lock().await.active;
        self.metrics.set_active_tasks(active);
        self.metrics.set_queue_depth(self.pending.len().await);
    }

    pub(crate) async fn push_pending(&self, task_id: TaskId) {
        if let Err(e) = self.pending.push(task_id).await {
            error!(task_id = %task_id, error = %e, "failed to enqueue task");
        }
        self.metrics.set_queue_depth(self.pending.len().await);
    }

    pub(crate) fn run_token(&self) -> CancellationToken {
        self.run_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.run_token.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }

    /// 終了済みで `max_age` より古いタスクを削除し、削除件数を返す
    pub(crate) async fn cleanup(&self, max_age: Duration) -> usize {
        let removed = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            let before = state.tasks.len();
            state.tasks.retain(|_, task| !task.is_expired(now, max_age));
            before - state.tasks.len()
        };
        if removed > 0 {
            info!(removed, max_age_secs = max_age.as_secs(), "cleaned up old tasks");
        }
        self.persist().await;
        removed
    }

    /// 保存済みの表を取り込み、未完了タスクを作成順に積み直す
    ///
    /// - 表にまだ無い id だけを取り込む（submit 済みのものを上書きしない）
    /// - 取り込んだ Processing / Retrying は Queued に戻す（前回の attempt は失われた扱い）
    /// - 表にある Retrying は前回の stop() でタイマーが捨てられたもの
    async fn recover(&self) {
        let loaded = match self.store.load().await {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "failed to load task table, starting empty");
                TaskTable::new()
            }
        };
        let loaded_count = loaded.len();

        let mut requeue = Vec::new();
        {
            let mut state = self.state.lock().await;
            for task in state.tasks.values_mut() {
                if task.status == TaskStatus::Retrying {
                    task.requeue();
                    requeue.push((task.created_at, task.id));
                }
            }
            for (id, mut task) in loaded {
                let Entry::Vacant(slot) = state.tasks.entry(id) else {
                    continue;
                };
                if task.status.is_recoverable() {
                    if task.status != TaskStatus::Queued {
                        debug!(task_id = %id, status = %task.status, "re-queueing interrupted task");
                    }
                    task.requeue();
                    requeue.push((task.created_at, id));
                }
                slot.insert(task);
            }
        }
        requeue.sort();

        info!(
            loaded = loaded_count,
            requeued = requeue.len(),
            "recovered task table"
        );
        self.persist().await;
        for (_, id) in requeue {
            self.push_pending(id).await;
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
    gc: Option<JoinHandle<()>>,
}

/// 安価に clone できるキューのハンドル
///
/// # 使用例
/// ```ignore
/// let queue = QueueBuilder::new(QueueConfig::default())
///     .register::<Transcribe, _>(AsrHandler)
///     .build()?;
/// queue.start().await?;
///
/// let id = queue.submit("asr", params).await;
/// let task = queue.get_task(id).await;
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
    lifecycle: Arc<Mutex<Option<Running>>>,
}

impl TaskQueue {
    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            lifecycle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// キューのデフォルト (max_retries, timeout) で投入
    pub async fn submit(&self, task_type: impl Into<String>, parameters: Parameters) -> TaskId {
        self.submit_with(task_type, parameters, SubmitOptions::default())
            .await
    }

    /// 実行を待たずに id を返す。保存の失敗はログのみ
    pub async fn submit_with(
        &self,
        task_type: impl Into<String>,
        parameters: Parameters,
        options: SubmitOptions,
    ) -> TaskId {
        let task_type = task_type.into();
        let max_retries = options.max_retries.unwrap_or(self.shared.config.max_retries);
        let timeout = options.timeout.unwrap_or_else(|| self.shared.config.timeout());

        let task_id = {
            let mut state = self.shared.state.lock().await;
            let mut task_id = self.shared.ids.generate_task_id();
            while state.tasks.contains_key(&task_id) {
                task_id = self.shared.ids.generate_task_id();
            }
            let now = self.shared.clock.now();
            let task = Task::new(task_id, task_type.as_str(), parameters, max_retries, timeout, now);
            state.tasks.insert(task_id, task);
            task_id
        };
        info!(task_id = %task_id, task_type = %task_type, "task submitted");

        self.shared.persist().await;
        self.shared.push_pending(task_id).await;
        task_id
    }

    /// 型付きで投入。`T` が JSON object にならなければエラー
    pub async fn submit_task<T: TaskKind>(
        &self,
        task: &T,
        options: SubmitOptions,
    ) -> Result<TaskId, SpoolError> {
        let parameters = to_parameters(task)?;
        Ok(self.submit_with(T::TYPE, parameters, options).await)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.shared.state.lock().await.tasks.get(&task_id).cloned()
    }

    /// Queued のときだけ取り消せる。それ以外（未知の id を含む）は false
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let cancelled = {
            let mut state = self.shared.state.lock().await;
            let now = self.shared.clock.now();
            state
                .tasks
                .get_mut(&task_id)
                .is_some_and(|task| task.cancel(now))
        };
        if cancelled {
            info!(task_id = %task_id, "task cancelled");
            self.shared.persist().await;
        }
        cancelled
    }

    /// 件数は状態ロックを保持したまま読む
    ///
    /// submit は保存してから pending に積むので、その間だけ `pending_count` が
    /// `total_count` に対して 1 件遅れることがある
    pub async fn queue_status(&self) -> QueueStatus {
        let (pending_count, active_count, total_count) = {
            let state = self.shared.state.lock().await;
            (
                self.shared.pending.len().await,
                state.active,
                state.tasks.len(),
            )
        };
        let worker_running = self
            .lifecycle
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.worker.is_finished());
        QueueStatus {
            pending_count,
            active_count,
            total_count,
            concurrency_cap: self.shared.config.concurrency_cap,
            worker_running,
        }
    }

    /// 終了済み (completed / failed / cancelled) で `max_age` より前に終わったタスクを削除
    pub async fn cleanup_old_tasks(&self, max_age: Duration) -> usize {
        self.shared.cleanup(max_age).await
    }

    /// 保存済みの状態を読み込み、ワーカーループ（と cleanup ループ）を起動
    pub async fn start(&self) -> Result<(), SpoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(SpoolError::AlreadyStarted);
        }

        self.shared.recover().await;

        let shutdown = self.shared.begin_run();
        let worker = tokio::spawn(worker_loop::run(
            Arc::clone(&self.shared),
            shutdown.clone(),
        ));
        let gc = self.shared.config.cleanup_interval().map(|interval| {
            tokio::spawn(gc_loop::run(
                Arc::clone(&self.shared),
                interval,
                self.shared.config.cleanup_max_age(),
                shutdown.clone(),
            ))
        });

        info!(
            concurrency_cap = self.shared.config.concurrency_cap,
            handlers = self.shared.registry.len(),
            "queue started"
        );
        *lifecycle = Some(Running {
            shutdown,
            worker,
            gc,
        });
        Ok(())
    }

    /// ワーカーループを止めて最後に保存する
    ///
    /// 実行中の attempt は中断しない。待機中のリトライタイマーは捨てられ、
    /// そのタスクは Retrying のまま保存される（次の start() で積み直す）
    pub async fn stop(&self) {
        let Some(running) = self.lifecycle.lock().await.take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.worker.await {
            error!(error = %e, "worker loop ended abnormally");
        }
        if let Some(gc) = running.gc
            && let Err(e) = gc.await
        {
            error!(error = %e, "cleanup loop ended abnormally");
        }
        self.shared.persist().await;
        info!("queue stopped");
    }
}
