//! DeliveryQueue port - 配送キュー（pending work channel）
//!
//! DeliveryQueue は task_id のみを流します（状態や parameters は含まない）。
//!
//! # 設計原則
//! - task_id のみを保持（状態はキューのタスク表が正本）
//! - FIFO（優先度なし）
//! - blocking pop（timeout 付き）: ワーカーループが idle 時に persist / shutdown 判定できるように

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TaskId;
use crate::error::SpoolError;

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// 末尾に追加
    async fn push(&self, task_id: TaskId) -> Result<(), SpoolError>;

    /// 先頭を取り出す。`timeout` 以内に何も来なければ `Ok(None)`
    async fn pop(&self, timeout: Duration) -> Result<Option<TaskId>, SpoolError>;

    /// 待機中の件数
    async fn len(&self) -> usize;
}
