//! TaskContext - Handler に渡す実行コンテキスト
//!
//! - 進捗の報告（ProgressReporter）
//! - タイムアウト時のキャンセル通知（CancellationToken）
//!
//! 進捗は watch channel で attempt runner に送られ、runner がキューのロックを取って
//! `task.progress` に書き込みます。Handler 側はロックに触れないので、
//! blocking スレッドからでも同じ API で報告できます。

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::TaskId;

/// 進捗 (0-100) の送信側。最新値だけが意味を持つ
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressReporter {
    pub(crate) fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// 受信側を持たない reporter（handler の単体テスト用）
    pub fn detached() -> Self {
        Self::channel().0
    }

    /// 100 を超える値は 100 に丸める
    pub fn report(&self, percent: u8) {
        self.tx.send_replace(percent.min(100));
    }

    pub fn last(&self) -> u8 {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    attempt: u32,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        attempt: u32,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            attempt,
            progress,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 1 始まり
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn report_progress(&self, percent: u8) {
        self.progress.report(percent);
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// attempt がタイムアウトで打ち切られたか
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 子プロセスを持つ handler はこれを select! して kill すること
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
