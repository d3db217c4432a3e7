//! JsonFileTaskStore - タスク表を 1 つの JSON ファイルに保存
//!
//! ```text
//! {path}       <- { "task-01H...": { ...Task }, ... }
//! {path}.tmp   <- 書き込み途中（rename で置き換える）
//! ```
//!
//! 途中でプロセスが落ちても、前回のスナップショットか今回のものの
//! どちらかが残るように tmp へ書いてから rename します。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::SpoolError;
use crate::ports::{TaskStore, TaskTable};

pub struct JsonFileTaskStore {
    path: PathBuf,
}

impl JsonFileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn save(&self, tasks: &TaskTable) -> Result<(), SpoolError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_vec_pretty(tasks)?;
        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        debug!(path = ?self.path, tasks = tasks.len(), "saved task snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<TaskTable, SpoolError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no task snapshot yet");
                return Ok(TaskTable::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<TaskTable>(&content) {
            Ok(tasks) => {
                debug!(path = ?self.path, tasks = tasks.len(), "loaded task snapshot");
                Ok(tasks)
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "task snapshot is unreadable, starting empty");
                Ok(TaskTable::new())
            }
        }
    }
}
