//! Attempt runner - 1 回分の実行と、その結果の反映
//!
//! # フロー
//! 1. registry から handler を引く（無ければ Unroutable）
//! 2. handler を別の tokio タスクで起動（panic を JoinError で受ける）
//! 3. timeout・進捗・完了を select! で待つ
//! 4. 状態ロック内で Decider に従って Completed / Retrying / Failed へ遷移
//! 5. Retry ならタイマータスクで遅延後に積み直す（ワーカーループは待たない）

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::scheduler::Shared;
use crate::domain::{AttemptOutcome, Decision, FailureKind, Task, TaskId, TaskStatus};
use crate::typed::{HandlerError, ProgressReporter, TaskContext};

/// `task` は claim 直後（Processing）の snapshot
pub(crate) async fn run(shared: Arc<Shared>, task: Task) {
    let span = info_span!(
        "attempt",
        task_id = %task.id,
        task_type = %task.task_type,
        attempt = task.attempt()
    );
    async move {
        let started = Instant::now();
        let outcome = execute(&shared, &task).await;
        settle(&shared, &task, outcome, started.elapsed()).await;
    }
    .instrument(span)
    .await
}

async fn execute(shared: &Shared, task: &Task) -> AttemptOutcome {
    let Some(handler) = shared.registry.get(&task.task_type) else {
        return AttemptOutcome::failure(
            FailureKind::Unroutable,
            format!("Unknown task type: {}", task.task_type),
        );
    };

    let (reporter, mut progress_rx) = ProgressReporter::channel();
    let cancel = CancellationToken::new();
    let ctx = TaskContext::new(task.id, task.attempt(), reporter, cancel.clone());
    let parameters = task.parameters.clone();
    let mut join = tokio::spawn(async move { handler.handle_dyn(parameters, ctx).await });

    let deadline = tokio::time::sleep(task.timeout);
    tokio::pin!(deadline);
    let mut written = 0u8;
    let mut progress_open = true;

    let outcome = loop {
        tokio::select! {
            joined = &mut join => {
                break match joined {
                    Ok(Ok(result)) => AttemptOutcome::Completed(result),
                    Ok(Err(e @ HandlerError::InvalidParameters(_))) => {
                        AttemptOutcome::failure(FailureKind::InvalidParameters, e.to_string())
                    }
                    Ok(Err(e)) => AttemptOutcome::failure(FailureKind::Handler, e.to_string()),
                    Err(e) if e.is_panic() => AttemptOutcome::failure(
                        FailureKind::Panicked,
                        format!("handler panicked: {}", panic_message(&*e.into_panic())),
                    ),
                    Err(e) => AttemptOutcome::failure(FailureKind::Handler, format!("handler aborted: {e}")),
                };
            }
            _ = &mut deadline => {
                // async handler は次の await で止まる。blocking handler はトークンで知らせるだけ
                cancel.cancel();
                join.abort();
                break AttemptOutcome::failure(
                    FailureKind::Timeout,
                    format!("Task timed out after {:?}", task.timeout),
                );
            }
            changed = progress_rx.changed(), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
                let percent = *progress_rx.borrow_and_update();
                written = write_progress(shared, task.id, percent).await.unwrap_or(written);
            }
        }
    };

    // 完了直前の報告を取りこぼさない
    let last = *progress_rx.borrow();
    if last != written {
        write_progress(shared, task.id, last).await;
    }
    outcome
}

async fn write_progress(shared: &Shared, task_id: TaskId, percent: u8) -> Option<u8> {
    let mut state = shared.state.lock().await;
    let task = state.tasks.get_mut(&task_id)?;
    task.set_progress(percent);
    Some(task.progress)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn settle(shared: &Arc<Shared>, claimed: &Task, outcome: AttemptOutcome, elapsed: Duration) {
    let failed = !outcome.is_success();
    let mut retry_after = None;

    {
        let mut state = shared.state.lock().await;
        let now = shared.clock.now();
        state.active = state.active.saturating_sub(1);
        match state.tasks.get_mut(&claimed.id) {
            Some(task) => match outcome {
                AttemptOutcome::Completed(result) => {
                    task.mark_completed(result, now);
                    info!(elapsed_ms = elapsed.as_millis() as u64, "task completed");
                }
                AttemptOutcome::Failed(failure) => match shared.decider.decide(task, &failure) {
                    Decision::Retry { delay, reason } => {
                        warn!(error = %failure, kind = ?failure.kind, %reason, "attempt failed, will retry");
                        task.schedule_retry(failure.message);
                        retry_after = Some(delay);
                    }
                    Decision::MarkFailed { reason } => {
                        error!(error = %failure, kind = ?failure.kind, %reason, "task failed");
                        task.mark_failed(failure.message, now);
                    }
                },
            },
            None => warn!("task vanished while running"),
        }
        // 終了状態が見えた時点で集計も済んでいるようにロック内で記録する
        shared.metrics.set_active_tasks(state.active);
        shared.metrics.observe_duration(&claimed.task_type, elapsed);
        if failed {
            shared.metrics.record_failure(&claimed.task_type);
        }
    }

    shared.slot_freed.notify_one();
    shared.persist().await;

    if let Some(delay) = retry_after {
        schedule_requeue(Arc::clone(shared), claimed.id, delay);
    }
}

/// `delay` 後に Retrying → Queued に戻して配送キューの末尾へ。
/// キューが止まったらタイマーは捨て、タスクは Retrying のまま残す
fn schedule_requeue(shared: Arc<Shared>, task_id: TaskId, delay: Duration) {
    let shutdown = shared.run_token();
    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("retry timer dropped on shutdown");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let requeued = {
                let mut state = shared.state.lock().await;
                match state.tasks.get_mut(&task_id) {
                    Some(task) if task.status == TaskStatus::Retrying => {
                        task.requeue();
                        true
                    }
                    _ => false,
                }
            };
            if requeued {
                debug!(delay_ms = delay.as_millis() as u64, "task re-queued");
                shared.persist().await;
                shared.push_pending(task_id).await;
            }
        }
        .instrument(span),
    );
}
