//! Task identifier.
//!
//! # ULID ベースの ID
//! TaskId は ULID (Universally Unique Lexicographically Sortable Identifier) を包む newtype です。
//!
//! - **時刻でソート可能**: 生成順序 ≒ 投入順序なので、スナップショットが作成順に並ぶ
//! - **文字列表現**: `task-<ulid>` の形で API / 永続化に出す
//! - **パース可能**: `task-` プレフィックス付き・無しのどちらも受け付ける

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::error::SpoolError;

const PREFIX: &str = "task-";

/// Identifier of a Task (submit/status/cancel unit).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|e| SpoolError::InvalidTaskId(format!("{s}: {e}")))
    }
}

// スナップショットは task id をキーにした JSON object なので、
// 常に文字列として出し入れする（map key としても使える）。
impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
