//! Queue - スケジューラ本体
//!
//! - **TaskQueue**: submit / get_task / cancel / queue_status / cleanup_old_tasks / start / stop
//! - **attempt**: 1 回分の実行（timeout・進捗・panic の扱い）と結果の反映
//! - **RetryPolicy**: 指数バックオフ

pub(crate) mod attempt;
mod retry;
pub(crate) mod scheduler;

#[cfg(test)]
mod tests;

pub use self::retry::RetryPolicy;
pub use self::scheduler::TaskQueue;
