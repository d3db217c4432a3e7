//! InMemoryTaskStore - テスト用・揮発デプロイ用の TaskStore
//!
//! 同じ store を別の TaskQueue に渡すと「再起動」を再現できます。

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SpoolError;
use crate::ports::{TaskStore, TaskTable};

#[derive(Default)]
pub struct InMemoryTaskStore {
    snapshot: RwLock<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存スナップショットを持った store を作る
    pub fn with_snapshot(snapshot: TaskTable) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> TaskTable {
        self.snapshot.read().await.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, tasks: &TaskTable) -> Result<(), SpoolError> {
        *self.snapshot.write().await = tasks.clone();
        Ok(())
    }

    async fn load(&self) -> Result<TaskTable, SpoolError> {
        Ok(self.snapshot.read().await.clone())
    }
}
