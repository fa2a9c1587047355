//! ルーティング単位となる Envelope とその種別の定義
//!
//! ## ワイヤ形式
//!
//! transport の 1 メッセージにつき 1 つの Envelope を JSON で載せる:
//!
//! ```json
//! {
//!   "kind": "chat",
//!   "data": { "content": "hello" },
//!   "timestamp": "2026-01-01T00:00:00+00:00",
//!   "sender": { "id": "alice", "name": "Alice", "role": "tenant" },
//!   "room": "building-7",
//!   "correlation_id": "..."
//! }
//! ```
//!
//! `sender` / `room` / `correlation_id` は省略可能。`room` が無い Envelope は
//! 送信者を除く全登録接続へのブロードキャストになる。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identity::{PeerIdentity, UserId};
use super::room::RoomName;

/// Envelope の種別
///
/// 種別によって `data` の形は変わる。`join` / `leave` は制御種別で、
/// ルーティングされずに Registry のルーム変更として処理される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// チャット本文
    Chat,
    /// 入力中インジケータ
    Typing,
    /// 配信・既読レシート（`correlation_id` で元の Envelope を参照する）
    Receipt,
    /// ルーム参加（制御種別）
    Join,
    /// ルーム退出（制御種別）
    Leave,
    /// キープアライブ
    Ping,
    /// プレゼンス変更（サーバ起点）
    Presence,
}

impl EnvelopeKind {
    /// ルーティングせず Registry 操作として扱う制御種別かどうか
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }
}

/// 送信者情報
///
/// クライアント起点の Envelope をリレーするときにハブが設定する。
/// サーバ起点の Envelope（プレゼンス通知など）では空のまま。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: String,
}

impl From<&PeerIdentity> for SenderInfo {
    fn from(identity: &PeerIdentity) -> Self {
        Self {
            id: identity.user_id.clone(),
            name: identity.display_name.clone(),
            role: identity.role.clone(),
        }
    }
}

/// ルーティングの単位
///
/// Envelope はメッセージごとに組み立てられる使い捨ての値で、
/// このサブシステムでは永続化しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// 種別ごとの不透明なペイロード
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// 生成時刻（RFC 3339）。クライアント起点の Envelope はリレー時に刻印し直す
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
    /// 配信先ルーム。`None` は送信者を除く全登録接続へのブロードキャスト
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// サーバ起点の Envelope を作る（送信者なし、ルームなし）
    pub fn server(kind: EnvelopeKind, data: Value, timestamp: String) -> Self {
        Self {
            kind,
            data,
            timestamp,
            sender: None,
            room: None,
            correlation_id: None,
        }
    }

    /// サーバ起点のルーム宛 Envelope を作る
    pub fn server_to_room(kind: EnvelopeKind, room: RoomName, data: Value, timestamp: String) -> Self {
        Self {
            room: Some(room),
            ..Self::server(kind, data, timestamp)
        }
    }

    /// プレゼンス変更の Envelope を作る
    pub fn presence(user_id: &UserId, display_name: &str, online: bool, timestamp: String) -> Self {
        Self::server(
            EnvelopeKind::Presence,
            serde_json::json!({
                "user_id": user_id.as_str(),
                "name": display_name,
                "online": online,
            }),
            timestamp,
        )
    }
}
