//! TaskKind trait - task_type とパラメータ型の対応付け
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - パラメータ型そのものが「型ごとのスキーマ」になる（decode 失敗 = スキーマ違反）

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Parameters;
use crate::error::SpoolError;

/// TaskKind は task_type と parameters の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct BurnSubtitles {
///     media_path: String,
///     ass_path: String,
/// }
///
/// impl TaskKind for BurnSubtitles {
///     const TYPE: &'static str = "burn";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: submit 時に parameters（JSON object）へ変換するため
/// - `DeserializeOwned`: 実行時に parameters から復元するため
/// - `Send + Sync + 'static`: 別タスク・blocking スレッドへ渡すため
pub trait TaskKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// `T` を parameters に変換。JSON object にならない型はエラー
pub fn to_parameters<T: TaskKind>(task: &T) -> Result<Parameters, SpoolError> {
    match serde_json::to_value(task)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(SpoolError::InvalidParameters(other.to_string())),
    }
}
