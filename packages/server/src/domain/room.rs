//! ルーム名の値オブジェクト
//!
//! ルーム名は不透明な識別子として扱う。特定のルーム名をハブのロジックで
//! 特別扱いしてはならない。ルームの意味付け（会話か一斉配信か等）は
//! 呼び出し側コラボレータの責務。
//!
//! 「ルーム無し / グローバルスコープのみ」は `Option<RoomName>` の `None` で表す。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// `RoomName` の最大文字数
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// ルーム名（Domain Model）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// 新しい RoomName を作成（空文字と長過ぎる名前は拒否する）
    pub fn new(value: String) -> Result<Self, DomainError> {
        let len = value.chars().count();
        if len == 0 || len > MAX_ROOM_NAME_LEN {
            return Err(DomainError::InvalidRoomName {
                got: len,
                max: MAX_ROOM_NAME_LEN,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
