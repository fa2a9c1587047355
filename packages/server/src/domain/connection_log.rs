//! 接続ライフサイクル永続化コラボレータの trait 定義
//!
//! ハブ自身の索引が配送の正であり、ここへの記録はあくまで外部台帳。
//! 呼び出しの失敗はログに残すだけで、ハブの正しさには影響させない。
//!
//! ## 依存性の逆転（DIP）
//!
//! - ドメイン層が必要とするインターフェースをドメイン層自身が定義
//! - Infrastructure 層がこの trait に依存して実装を提供する

use async_trait::async_trait;
use thiserror::Error;

use super::identity::{ConnectionId, UserId};
use super::room::RoomName;

/// 永続化される接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// 接続確立時に併せて記録するクライアント情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMetadata {
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum ConnectionLogError {
    #[error("connection log backend unavailable: {0}")]
    Unavailable(String),
}

/// 接続ライフサイクルの永続化コラボレータ
///
/// Registry / Sweeper から呼ばれる。登録処理は記録の成否を待たない
/// （fire-and-forget）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionLog: Send + Sync {
    /// 接続確立を記録する
    async fn record_connected(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        room: Option<RoomName>,
        metadata: &ClientMetadata,
    ) -> Result<(), ConnectionLogError>;

    /// 接続状態の変化を記録する
    async fn record_status_changed(
        &self,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    ) -> Result<(), ConnectionLogError>;

    /// 利用者のアクティブな接続 ID 一覧を返す
    async fn list_active_connection_ids(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConnectionId>, ConnectionLogError>;

    /// 更新が途絶えた接続記録を切断済みへ倒し、更新件数を返す
    ///
    /// プロセスがクリーンに終了せず再起動した場合などに残る残骸の回収用。
    async fn mark_stale_disconnected(&self) -> Result<u64, ConnectionLogError>;
}
