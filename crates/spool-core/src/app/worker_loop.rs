//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. active が上限なら slot_freed（か idle_poll）まで待つ。idle_poll 経過時は保存 + gauge 更新
//! 2. DeliveryQueue::pop(idle_poll) で task_id 取得。空なら idle tick（保存 + gauge 更新）
//! 3. 表から引いて、Queued でなければ（取り消し済みなど）読み捨て
//! 4. 状態ロック内で Processing にして active += 1
//! 5. attempt を spawn（結果の反映は attempt 側）
//!
//! ループ自身はハンドラを待たないので、停止要求には idle_poll 以内に応じます。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Task, TaskId, TaskStatus};
use crate::queue::attempt;
use crate::queue::scheduler::Shared;

pub(crate) async fn run(shared: Arc<Shared>, shutdown: CancellationToken) {
    let cap = shared.config.concurrency_cap;
    let idle_poll = shared.config.idle_poll();
    info!(concurrency_cap = cap, "worker loop started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if shared.state.lock().await.active >= cap {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = shared.slot_freed.notified() => {}
                _ = tokio::time::sleep(idle_poll) => {
                    shared.persist().await;
                    shared.publish_gauges().await;
                }
            }
            continue;
        }

        let popped = tokio::select! {
            _ = shutdown.cancelled() => break,
            popped = shared.pending.pop(idle_poll) => popped,
        };
        let task_id = match popped {
            Ok(Some(task_id)) => task_id,
            Ok(None) => {
                shared.persist().await;
                shared.publish_gauges().await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "failed to pop pending queue");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                }
                continue;
            }
        };

        let Some((task, active)) = claim(&shared, task_id).await else {
            continue;
        };
        shared.metrics.set_active_tasks(active);
        shared.metrics.set_queue_depth(shared.pending.len().await);
        shared.persist().await;

        tokio::spawn(attempt::run(Arc::clone(&shared), task));
    }

    info!("worker loop stopped");
}

/// Queued → Processing。claim できたら snapshot と claim 後の active 数を返す
async fn claim(shared: &Shared, task_id: TaskId) -> Option<(Task, usize)> {
    let mut state = shared.state.lock().await;
    let now = shared.clock.now();
    let Some(task) = state.tasks.get_mut(&task_id) else {
        debug!(task_id = %task_id, "skipping unknown task");
        return None;
    };
    if task.status != TaskStatus::Queued {
        debug!(task_id = %task_id, status = %task.status, "skipping task that is no longer queued");
        return None;
    }
    task.start_attempt(now);
    let snapshot = task.clone();
    state.active += 1;
    Some((snapshot, state.active))
}
