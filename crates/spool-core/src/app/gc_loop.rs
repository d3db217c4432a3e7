//! GCLoop - 古いタスクの定期削除
//!
//! `cleanup_interval` ごとに `cleanup_max_age` より前に終わったタスクを消します。
//! 初回は起動直後ではなく 1 interval 後。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::scheduler::Shared;

pub(crate) async fn run(
    shared: Arc<Shared>,
    interval: Duration,
    max_age: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                shared.cleanup(max_age).await;
            }
        }
    }
    debug!("cleanup loop stopped");
}
