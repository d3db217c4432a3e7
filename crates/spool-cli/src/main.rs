use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use spool_core::{
    BlockingHandler, Handler, HandlerError, QueueBuilder, QueueConfig, SubmitOptions, TaskContext,
    TaskKind,
};

/// 文字起こし（デモ用に sleep で代用）
#[derive(Debug, Serialize, Deserialize)]
struct Transcribe {
    media_path: String,
    #[serde(default = "default_model")]
    model_size: String,
    #[serde(default)]
    lang: Option<String>,
}

fn default_model() -> String {
    "small".to_string()
}

impl TaskKind for Transcribe {
    const TYPE: &'static str = "asr";
}

/// 字幕焼き込み（本来は ffmpeg を起動する同期処理）
#[derive(Debug, Serialize, Deserialize)]
struct BurnSubtitles {
    media_path: String,
    ass_path: String,
}

impl TaskKind for BurnSubtitles {
    const TYPE: &'static str = "burn";
}

/// 最初の `n` 回はわざと失敗する
struct AsrHandler {
    remaining_failures: AtomicU32,
}

impl AsrHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Transcribe> for AsrHandler {
    async fn handle(&self, task: Transcribe, ctx: TaskContext) -> Result<Value, HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::failed(format!(
                "intentional failure (left={left})"
            )));
        }

        for step in 1..=4u8 {
            tokio::select! {
                _ = ctx.cancelled() => return Err(HandlerError::failed("cancelled")),
                _ = sleep(Duration::from_millis(150)) => {}
            }
            ctx.report_progress(step * 25);
        }
        Ok(json!({
            "srt_path": task.media_path.replace(".mp4", ".srt"),
            "model_size": task.model_size,
            "lang": task.lang.unwrap_or_else(|| "auto".to_string()),
        }))
    }
}

struct FfmpegBurner;

impl BlockingHandler<BurnSubtitles> for FfmpegBurner {
    fn handle(&self, task: BurnSubtitles, ctx: TaskContext) -> Result<Value, HandlerError> {
        for step in 1..=5u8 {
            if ctx.is_cancelled() {
                return Err(HandlerError::failed("cancelled"));
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
            ctx.report_progress(step * 20);
        }
        Ok(json!({
            "output": task.media_path.replace(".mp4", "_subbed.mp4"),
            "subtitles": task.ass_path,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 設定を読み、handler を登録してキューを組み立てる
    let queue = QueueBuilder::new(QueueConfig::from_env()?)
        .register::<Transcribe, _>(AsrHandler::new(1))
        .register_blocking::<BurnSubtitles, _>(FfmpegBurner)
        .expect_tasks(&[Transcribe::TYPE, BurnSubtitles::TYPE])
        .build()?;

    // (B) 保存済みのタスクを復旧してワーカーを起動
    queue.start().await?;

    // (C) タスク投入
    let asr = queue
        .submit_task(
            &Transcribe {
                media_path: "uploads/talk.mp4".into(),
                model_size: default_model(),
                lang: Some("ja".into()),
            },
            SubmitOptions::new().max_retries(2),
        )
        .await?;
    let burn = queue
        .submit_task(
            &BurnSubtitles {
                media_path: "uploads/talk.mp4".into(),
                ass_path: "outputs/talk.ass".into(),
            },
            SubmitOptions::default(),
        )
        .await?;
    let extra = queue.submit("asr", serde_json::Map::new()).await;
    let cancelled = queue.cancel(extra).await;
    info!(%asr, %burn, %extra, cancelled, "submitted");

    // (D) 完了をポーリングで待つ
    for id in [asr, burn] {
        loop {
            let Some(task) = queue.get_task(id).await else {
                break;
            };
            if task.is_terminal() {
                println!("{}", serde_json::to_string_pretty(&task)?);
                break;
            }
            info!(task_id = %id, status = %task.status, progress = task.progress, "polling");
            sleep(Duration::from_millis(200)).await;
        }
    }
    println!("{}", serde_json::to_string_pretty(&queue.queue_status().await)?);

    // (E) 止めて最終状態を保存
    queue.stop().await;
    Ok(())
}
