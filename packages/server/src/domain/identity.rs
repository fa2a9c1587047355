//! 接続識別子と利用者識別子の値オブジェクト
//!
//! ## 責務
//!
//! - `UserId`: 外部の認証コラボレータが解決済みの利用者 ID（検証付き）
//! - `ConnectionId`: accept 時にリンクごとに生成される不透明な接続 ID
//! - `PeerIdentity`: ハブに渡される解決済みの接続者情報

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

/// `UserId` の最大文字数
pub const MAX_USER_ID_LEN: usize = 64;

/// 利用者 ID（Domain Model）
///
/// 同一利用者が複数の接続を同時に保持できるため、接続ごとに一意ではない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// 新しい UserId を作成（空文字と長過ぎる ID は拒否する）
    pub fn new(value: String) -> Result<Self, DomainError> {
        let len = value.chars().count();
        if len == 0 || len > MAX_USER_ID_LEN {
            return Err(DomainError::InvalidUserId {
                got: len,
                max: MAX_USER_ID_LEN,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 接続 ID（accept 時に生成され、リンクごとに一意。再利用しない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 解決済みの接続者情報
///
/// 認証そのものは外部コラボレータの責務。ハブは解決済みの識別子だけを受け取る。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
}

impl PeerIdentity {
    pub fn new(user_id: UserId, display_name: String, role: String) -> Self {
        Self {
            user_id,
            display_name,
            role,
        }
    }
}
