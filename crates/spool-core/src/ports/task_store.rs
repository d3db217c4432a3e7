//! TaskStore port - タスク表のスナップショット永続化
//!
//! TaskStore は「タスク表まるごと」を保存・復元します（追記ログではない）。
//!
//! # 設計原則
//! - save は前回のスナップショットを丸ごと上書き
//! - load は最新スナップショットを返す。無い・読めない場合は空の表
//! - 書き込みは単一ライター（キューが persist lock で直列化する）
//! - 失敗しても致命的ではない: メモリ上の表がプロセス生存中の正本

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{Task, TaskId};
use crate::error::SpoolError;

/// task id をキーにしたタスク表（ULID 順 ≒ 作成順）
pub type TaskTable = BTreeMap<TaskId, Task>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// スナップショットを上書き保存
    async fn save(&self, tasks: &TaskTable) -> Result<(), SpoolError>;

    /// 最新スナップショットを読む
    async fn load(&self) -> Result<TaskTable, SpoolError>;
}
