//! End-to-end behaviour of TaskQueue: lifecycle, retries, limits, recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::app::QueueBuilder;
use crate::config::QueueConfig;
use crate::domain::{Parameters, SubmitOptions, Task, TaskId, TaskStatus};
use crate::error::SpoolError;
use crate::impls::{InMemoryMetrics, InMemoryTaskStore, JsonFileTaskStore};
use crate::ports::{FixedClock, TaskStore, TaskTable};
use crate::queue::TaskQueue;
use crate::typed::handler::fixtures::EchoHandler;
use crate::typed::task::fixtures::Echo;
use crate::typed::{BlockingHandler, HandlerError, TaskContext, TaskKind};

fn fast_config() -> QueueConfig {
    QueueConfig {
        idle_poll_ms: 10,
        retry_base_delay_ms: 1,
        cleanup_interval_secs: None,
        ..QueueConfig::default()
    }
}

fn params(v: Value) -> Parameters {
    v.as_object().cloned().unwrap()
}

async fn wait_for(queue: &TaskQueue, id: TaskId, pred: impl Fn(&Task) -> bool) -> Task {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = queue.get_task(id).await
                && pred(&task)
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

async fn wait_terminal(queue: &TaskQueue, id: TaskId) -> Task {
    wait_for(queue, id, Task::is_terminal).await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sleep {
    ms: u64,
}

impl TaskKind for Sleep {
    const TYPE: &'static str = "sleep";
}

struct ThreadSleeper;

impl BlockingHandler<Sleep> for ThreadSleeper {
    fn handle(&self, task: Sleep, ctx: TaskContext) -> Result<Value, HandlerError> {
        ctx.report_progress(10);
        std::thread::sleep(Duration::from_millis(task.ms));
        Ok(json!({ "slept_ms": task.ms }))
    }
}

async fn explode(_params: Parameters, _ctx: TaskContext) -> Result<Value, HandlerError> {
    panic!("kaboom")
}

struct FailingStore;

#[async_trait]
impl TaskStore for FailingStore {
    async fn save(&self, _tasks: &TaskTable) -> Result<(), SpoolError> {
        Err(std::io::Error::other("disk full").into())
    }

    async fn load(&self) -> Result<TaskTable, SpoolError> {
        Err(std::io::Error::other("disk gone").into())
    }
}

#[tokio::test]
async fn echo_task_completes() {
    let queue = QueueBuilder::new(fast_config())
        .register::<Echo, _>(EchoHandler)
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("echo", params(json!({"value": 42}))).await;
    let task = wait_terminal(&queue, id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"value": 42})));
    assert_eq!(task.progress, 100);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert_eq!(task.retries, 0);
    queue.stop().await;
}

#[tokio::test]
async fn typed_submission() {
    let queue = QueueBuilder::new(fast_config())
        .register::<Echo, _>(EchoHandler)
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue
        .submit_task(&Echo { value: 7 }, SubmitOptions::default())
        .await
        .unwrap();
    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.task_type, "echo");
    assert_eq!(task.result, Some(json!({"value": 7})));
    queue.stop().await;
}

#[tokio::test]
async fn failing_handler_exhausts_retries() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&attempts);
    let queue = QueueBuilder::new(fast_config())
        .register_fn("flaky", move |_p: Parameters, ctx: TaskContext| {
            seen.lock().unwrap().push(ctx.attempt());
            async move { Err::<Value, _>(HandlerError::failed("boom")) }
        })
        .metrics(metrics.clone())
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue
        .submit_with("flaky", Parameters::new(), SubmitOptions::new().max_retries(2))
        .await;
    let task = wait_terminal(&queue, id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 2);
    assert!(task.error.as_deref().unwrap().contains("boom"));
    // 2 retrying transitions = 3 attempts
    assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(metrics.snapshot().failures["flaky"], 3);
    queue.stop().await;
}

#[tokio::test]
async fn retry_succeeds_after_transient_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let queue = QueueBuilder::new(fast_config())
        .register_fn("transient", move |_p: Parameters, _ctx: TaskContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(HandlerError::failed("first try fails"))
                } else {
                    Ok(json!("ok"))
                }
            }
        })
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("transient", Parameters::new()).await;
    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retries, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    queue.stop().await;
}

#[tokio::test]
async fn unknown_type_fails_without_retry() {
    let queue = QueueBuilder::new(fast_config()).build().unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("nope", Parameters::new()).await;
    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 0);
    assert!(task.error.unwrap().contains("Unknown task type"));
    queue.stop().await;
}

#[tokio::test]
async fn schema_mismatch_fails_without_retry() {
    let queue = QueueBuilder::new(fast_config())
        .register::<Echo, _>(EchoHandler)
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("echo", params(json!({"value": "x"}))).await;
    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 0);
    assert!(task.error.unwrap().contains("invalid parameters"));
    queue.stop().await;
}

#[tokio::test]
async fn timeout_counts_as_failure() {
    let queue = QueueBuilder::new(fast_config())
        .register_fn("hang", |_p: Parameters, _ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, HandlerError>(Value::Null)
        })
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue
        .submit_with(
            "hang",
            Parameters::new(),
            SubmitOptions::new()
                .max_retries(1)
                .timeout(Duration::from_millis(30)),
        )
        .await;
    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 1);
    assert!(task.error.unwrap().contains("timed out"));
    queue.stop().await;
}

#[tokio::test]
async fn panicking_handler_is_an_attempt_failure() {
    let queue = QueueBuilder::new(fast_config())
        .register_fn("explode", explode)
        .register::<Echo, _>(EchoHandler)
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let bad = queue
        .submit_with("explode", Parameters::new(), SubmitOptions::new().max_retries(1))
        .await;
    let task = wait_terminal(&queue, bad).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 1);
    assert!(task.error.unwrap().contains("kaboom"));

    // the worker loop survived
    let good = queue.submit("echo", params(json!({"value": 1}))).await;
    assert_eq!(wait_terminal(&queue, good).await.status, TaskStatus::Completed);
    assert!(queue.queue_status().await.worker_running);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_cap_is_never_exceeded() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    let queue = QueueBuilder::new(QueueConfig {
        concurrency_cap: 2,
        ..fast_config()
    })
    .register_fn("work", move |_p: Parameters, _ctx: TaskContext| {
        let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, HandlerError>(Value::Null)
        }
    })
    .metrics(metrics.clone())
    .build()
    .unwrap();
    queue.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(queue.submit("work", Parameters::new()).await);
    }
    for id in ids {
        assert_eq!(wait_terminal(&queue, id).await.status, TaskStatus::Completed);
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let snapshot = metrics.snapshot();
    assert!(snapshot.peak_active_tasks <= 2);
    assert_eq!(snapshot.durations["work"].count, 6);
    queue.stop().await;
}

#[tokio::test]
async fn cap_one_runs_blocking_tasks_one_at_a_time() {
    let queue = QueueBuilder::new(fast_config())
        .register_blocking::<Sleep, _>(ThreadSleeper)
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let first = queue.submit_task(&Sleep { ms: 100 }, SubmitOptions::default()).await.unwrap();
    let second = queue.submit_task(&Sleep { ms: 10 }, SubmitOptions::default()).await.unwrap();

    loop {
        // read the second before the first: a settled first task stays settled
        let b = queue.get_task(second).await.unwrap();
        let a = queue.get_task(first).await.unwrap();
        if a.is_terminal() {
            break;
        }
        assert!(b.started_at.is_none());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let b = wait_terminal(&queue, second).await;
    let a = queue.get_task(first).await.unwrap();
    assert_eq!(b.status, TaskStatus::Completed);
    assert!(b.started_at.unwrap() >= a.completed_at.unwrap());
    queue.stop().await;
}

#[tokio::test]
async fn progress_is_visible_while_running() {
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let queue = QueueBuilder::new(fast_config())
        .register_fn("staged", move |_p: Parameters, ctx: TaskContext| {
            let gate = Arc::clone(&gate);
            async move {
                ctx.report_progress(40);
                gate.notified().await;
                Ok::<_, HandlerError>(Value::Null)
            }
        })
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("staged", Parameters::new()).await;
    let running = wait_for(&queue, id, |t| t.progress == 40).await;
    assert_eq!(running.status, TaskStatus::Processing);

    release.notify_one();
    let done = wait_terminal(&queue, id).await;
    assert_eq!(done.progress, 100);
    queue.stop().await;
}

#[tokio::test]
async fn progress_reaches_store_while_cap_is_saturated() {
    let store = Arc::new(InMemoryTaskStore::new());
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let queue = QueueBuilder::new(fast_config())
        .register_fn("staged", move |_p: Parameters, ctx: TaskContext| {
            let gate = Arc::clone(&gate);
            async move {
                ctx.report_progress(40);
                gate.notified().await;
                Ok::<_, HandlerError>(Value::Null)
            }
        })
        .store(store.clone())
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("staged", Parameters::new()).await;
    wait_for(&queue, id, |t| t.progress == 40).await;
    // cap 1 で唯一の slot が埋まったまま、数 idle_poll 待つ
    tokio::time::sleep(Duration::from_millis(100)).await;

    let saved = store.snapshot().await;
    assert_eq!(saved[&id].status, TaskStatus::Processing);
    assert_eq!(saved[&id].progress, 40);

    release.notify_one();
    wait_terminal(&queue, id).await;
    queue.stop().await;
}

#[tokio::test]
async fn cancel_only_succeeds_while_queued() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let queue = QueueBuilder::new(fast_config())
        .register_fn("count", move |_p: Parameters, _ctx: TaskContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, HandlerError>(Value::Null) }
        })
        .build()
        .unwrap();

    // not started yet, so both stay queued
    let cancelled = queue.submit("count", Parameters::new()).await;
    let kept = queue.submit("count", Parameters::new()).await;

    assert!(queue.cancel(cancelled).await);
    assert!(!queue.cancel(cancelled).await);
    assert!(!queue.cancel(TaskId::from_ulid(ulid::Ulid::new())).await);

    let task = queue.get_task(cancelled).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.completed_at.is_some());

    queue.start().await.unwrap();
    assert_eq!(wait_terminal(&queue, kept).await.status, TaskStatus::Completed);
    assert!(!queue.cancel(kept).await);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.get_task(cancelled).await.unwrap().status,
        TaskStatus::Cancelled
    );
    queue.stop().await;
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_tasks() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(t0));
    let queue = QueueBuilder::new(fast_config())
        .clock(clock.clone())
        .build()
        .unwrap();

    let old = queue.submit("x", Parameters::new()).await;
    let recent = queue.submit("x", Parameters::new()).await;
    let pending = queue.submit("x", Parameters::new()).await;

    assert!(queue.cancel(old).await);
    clock.advance(chrono::Duration::minutes(90));
    assert!(queue.cancel(recent).await);
    clock.advance(chrono::Duration::minutes(30));

    let removed = queue.cleanup_old_tasks(Duration::from_secs(3600)).await;
    assert_eq!(removed, 1);
    assert!(queue.get_task(old).await.is_none());
    assert!(queue.get_task(recent).await.is_some());
    assert!(queue.get_task(pending).await.is_some());
    assert_eq!(queue.queue_status().await.total_count, 2);
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_runs_periodically_until_stop() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(t0));
    let queue = QueueBuilder::new(QueueConfig {
        idle_poll_ms: 1000,
        cleanup_interval_secs: Some(60),
        cleanup_max_age_secs: 3600,
        ..fast_config()
    })
    .clock(clock.clone())
    .build()
    .unwrap();

    let old = queue.submit("x", Parameters::new()).await;
    assert!(queue.cancel(old).await);
    clock.advance(chrono::Duration::hours(2));
    let recent = queue.submit("x", Parameters::new()).await;
    assert!(queue.cancel(recent).await);

    queue.start().await.unwrap();
    // 初回は 1 interval 後
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(queue.get_task(old).await.is_some());

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(queue.get_task(old).await.is_none());
    assert!(queue.get_task(recent).await.is_some());

    queue.stop().await;
    clock.advance(chrono::Duration::hours(2));
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(queue.get_task(recent).await.is_some());
}

#[tokio::test]
async fn processing_task_is_recovered_on_start() {
    let now = Utc::now();
    let id = TaskId::from_ulid(ulid::Ulid::new());
    let mut interrupted = Task::new(
        id,
        "echo",
        params(json!({"value": 5})),
        3,
        Duration::from_secs(60),
        now,
    );
    interrupted.start_attempt(now);
    let store = Arc::new(InMemoryTaskStore::with_snapshot(TaskTable::from([(
        id,
        interrupted,
    )])));

    let queue = QueueBuilder::new(fast_config())
        .register::<Echo, _>(EchoHandler)
        .store(store.clone())
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let task = wait_terminal(&queue, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"value": 5})));
    queue.stop().await;

    assert_eq!(store.snapshot().await[&id].status, TaskStatus::Completed);
}

#[tokio::test]
async fn queued_tasks_survive_restart_through_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        state_path: Some(dir.path().join("queue_state.json")),
        ..fast_config()
    };

    let first = QueueBuilder::new(config.clone()).build().unwrap();
    let id = first.submit("echo", params(json!({"value": 9}))).await;
    drop(first);

    let second = QueueBuilder::new(config.clone())
        .register::<Echo, _>(EchoHandler)
        .build()
        .unwrap();
    second.start().await.unwrap();
    let task = wait_terminal(&second, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    second.stop().await;

    let on_disk = JsonFileTaskStore::new(dir.path().join("queue_state.json"))
        .load()
        .await
        .unwrap();
    assert_eq!(on_disk[&id].status, TaskStatus::Completed);
}

#[tokio::test]
async fn stop_keeps_pending_retry_for_next_start() {
    let store = Arc::new(InMemoryTaskStore::new());
    let slow_retry = QueueConfig {
        retry_base_delay_ms: 60_000,
        ..fast_config()
    };

    let first = QueueBuilder::new(slow_retry)
        .register_fn("job", |_p: Parameters, _ctx: TaskContext| async move {
            Err::<Value, _>(HandlerError::failed("transient"))
        })
        .store(store.clone())
        .build()
        .unwrap();
    first.start().await.unwrap();
    let id = first.submit("job", Parameters::new()).await;
    wait_for(&first, id, |t| t.status == TaskStatus::Retrying).await;
    first.stop().await;
    assert_eq!(store.snapshot().await[&id].status, TaskStatus::Retrying);

    let second = QueueBuilder::new(fast_config())
        .register_fn("job", |_p: Parameters, _ctx: TaskContext| async move {
            Ok::<_, HandlerError>(json!("recovered"))
        })
        .store(store.clone())
        .build()
        .unwrap();
    second.start().await.unwrap();
    let task = wait_terminal(&second, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retries, 1);
    second.stop().await;
}

#[tokio::test]
async fn store_failures_are_not_fatal() {
    let queue = QueueBuilder::new(fast_config())
        .register::<Echo, _>(EchoHandler)
        .store(Arc::new(FailingStore))
        .build()
        .unwrap();
    queue.start().await.unwrap();

    let id = queue.submit("echo", params(json!({"value": 3}))).await;
    assert_eq!(wait_terminal(&queue, id).await.status, TaskStatus::Completed);
    queue.stop().await;
}

#[tokio::test]
async fn lifecycle_and_status() {
    let queue = QueueBuilder::new(QueueConfig {
        concurrency_cap: 3,
        ..fast_config()
    })
    .build()
    .unwrap();

    let status = queue.queue_status().await;
    assert!(!status.worker_running);
    assert_eq!(status.concurrency_cap, 3);

    queue.start().await.unwrap();
    assert!(matches!(queue.start().await, Err(SpoolError::AlreadyStarted)));
    assert!(queue.queue_status().await.worker_running);

    queue.stop().await;
    let status = queue.queue_status().await;
    assert!(!status.worker_running);
    assert_eq!(status.active_count, 0);
}

#[tokio::test]
async fn status_counts_come_from_one_snapshot() {
    let queue = QueueBuilder::new(fast_config()).build().unwrap();
    let first = queue.submit("x", Parameters::new()).await;
    queue.submit("x", Parameters::new()).await;
    assert!(queue.cancel(first).await);

    let status = queue.queue_status().await;
    assert_eq!(status.total_count, 2);
    assert_eq!(status.active_count, 0);
    // 取り消し済みの id は worker が読み捨てるまで pending に残る
    assert_eq!(status.pending_count, 2);
}
