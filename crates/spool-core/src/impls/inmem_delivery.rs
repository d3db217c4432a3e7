//! InMemoryDeliveryQueue - プロセス内の配送キュー
//!
//! # 実装詳細
//! - `VecDeque<TaskId>` を tokio の Mutex で保護
//! - Notify で push 時に待機中の pop を起こす
//! - pop は deadline 付き（idle tick を作るため）

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::TaskId;
use crate::error::SpoolError;
use crate::ports::DeliveryQueue;

#[derive(Default)]
pub struct InMemoryDeliveryQueue {
    queue: Mutex<VecDeque<TaskId>>,
    notify: Notify,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn push(&self, task_id: TaskId) -> Result<(), SpoolError> {
        self.queue.lock().await.push_back(task_id);
        // 待機者がいなければ permit が残るので、次の pop は取りこぼさない
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<TaskId>, SpoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task_id) = self.queue.lock().await.pop_front() {
                return Ok(Some(task_id));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // 締切直前に push された分は拾っておく
                return Ok(self.queue.lock().await.pop_front());
            }
        }
    }

    async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
