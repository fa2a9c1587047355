//! Router: Envelope から配送先集合を決め、各宛先の送信キューへ enqueue する
//!
//! ## 方針
//!
//! - 遅い消費者 1 本にルーム全体の配送を止めさせない。キュー満杯の宛先は
//!   ブロックせず評価リスト（eviction list）へ載せ、呼び出し側が即座に切断する
//! - 送信者付きの Envelope は送信者自身の接続へ配送しない（自己エコーの禁止）。
//!   サーバ起点（送信者なし）の Envelope は全宛先に届く
//! - 単一プロデューサからの dispatch 順序は、各宛先キューが FIFO であることで
//!   そのまま保存される。異なるプロデューサ間の全体順序は保証しない

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Envelope, RoomName, UserId};

use super::connection::{ConnectionHandle, EnqueueError};
use super::registry::Registry;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 1 回の dispatch の結果
#[derive(Default)]
pub struct Delivery {
    /// enqueue に成功した宛先数
    pub delivered: usize,
    /// キュー満杯で応答不能と判定された宛先。呼び出し側が Deregister する
    pub evicted: Vec<Arc<ConnectionHandle>>,
}

/// `envelope.room` に従って配送先を決める（`None` は全登録接続）
pub async fn dispatch(registry: &Registry, envelope: &Envelope) -> Result<Delivery, DispatchError> {
    let targets = match &envelope.room {
        Some(room) => registry.connections_by_room(room).await,
        None => registry.all_connections().await,
    };
    deliver(targets, envelope)
}

/// 利用者宛の直接配送（その利用者の全接続が宛先）
pub async fn dispatch_to_user(
    registry: &Registry,
    user_id: &UserId,
    envelope: &Envelope,
) -> Result<Delivery, DispatchError> {
    let targets = registry.connections_by_user(user_id).await;
    deliver(targets, envelope)
}

/// ルーム宛の直接配送
pub async fn dispatch_to_room(
    registry: &Registry,
    room: &RoomName,
    envelope: &Envelope,
) -> Result<Delivery, DispatchError> {
    let targets = registry.connections_by_room(room).await;
    deliver(targets, envelope)
}

/// 共通配送処理。フレームは宛先数に関わらず一度だけシリアライズする
fn deliver(targets: Vec<Arc<ConnectionHandle>>, envelope: &Envelope) -> Result<Delivery, DispatchError> {
    let frame = serde_json::to_string(envelope)?;
    let mut delivery = Delivery::default();

    for target in targets {
        if let Some(sender) = &envelope.sender {
            // 自己エコーの禁止: 送信者の接続（別リンク含む）を飛ばす
            if sender.id == *target.user_id() {
                continue;
            }
        }
        match target.enqueue(frame.clone()) {
            Ok(()) => delivery.delivered += 1,
            Err(EnqueueError::Full) => {
                tracing::warn!(
                    connection_id = %target.id(),
                    user_id = %target.user_id(),
                    "outbound queue full, marking connection for eviction"
                );
                delivery.evicted.push(target);
            }
            // 切断処理中の宛先とレースしただけなのでスキップ
            Err(EnqueueError::Closed) => {}
        }
    }

    Ok(delivery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvelopeKind, PeerIdentity, SenderInfo};
    use serde_json::json;
    use tokio::sync::mpsc;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - 配送先の決定（ルーム宛 / 全体 / 利用者宛）
    // - 自己エコーの禁止（送信者の全接続がスキップされること）
    // - キュー満杯の宛先が evicted として報告されること
    // - 単一プロデューサからの FIFO 順序
    //
    // 【なぜこのテストが必要か】
    // - 誤配送（自己エコー・ルーム越え）はクライアントに直接見える欠陥
    // - 満杯の宛先でブロックすると 1 本の遅い接続が全員を止めてしまう
    // ========================================

    fn identity(user: &str) -> PeerIdentity {
        PeerIdentity::new(
            UserId::new(user.to_string()).unwrap(),
            user.to_string(),
            "tenant".to_string(),
        )
    }

    fn room(name: &str) -> RoomName {
        RoomName::new(name.to_string()).unwrap()
    }

    async fn registered_handle(
        registry: &Registry,
        user: &str,
        room_name: Option<&str>,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<String>) {
        let (handle, rx) = ConnectionHandle::new(
            identity(user),
            room_name.map(|r| room(r)),
            capacity,
            0,
        );
        registry.register(handle.clone()).await.unwrap();
        (handle, rx)
    }

    fn chat_from(user: &str, room_name: Option<&str>) -> Envelope {
        Envelope {
            kind: EnvelopeKind::Chat,
            data: json!({ "content": "hello" }),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            sender: Some(SenderInfo {
                id: UserId::new(user.to_string()).unwrap(),
                name: user.to_string(),
                role: "tenant".to_string(),
            }),
            room: room_name.map(|r| room(r)),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_room_dispatch_reaches_other_members_only() {
        // テスト項目: ルーム宛の dispatch はそのルームの他メンバーだけに届く
        // given (前提条件):
        let registry = Registry::new();
        let (_alice, mut alice_rx) = registered_handle(&registry, "alice", Some("r1"), 8).await;
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", Some("r1"), 8).await;
        let (_carol, mut carol_rx) = registered_handle(&registry, "carol", Some("r2"), 8).await;

        // when (操作):
        let delivery = dispatch(&registry, &chat_from("alice", Some("r1")))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 1);
        assert!(delivery.evicted.is_empty());
        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_self_echo_covers_every_sender_connection() {
        // テスト項目: 送信者が複数接続を持っていても、どの接続にも
        //             自分の Envelope は届かない
        // given (前提条件):
        let registry = Registry::new();
        let (_a1, mut a1_rx) = registered_handle(&registry, "alice", Some("r1"), 8).await;
        let (_a2, mut a2_rx) = registered_handle(&registry, "alice", Some("r1"), 8).await;
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", Some("r1"), 8).await;

        // when (操作):
        let delivery = dispatch(&registry, &chat_from("alice", Some("r1")))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 1);
        assert!(a1_rx.try_recv().is_err());
        assert!(a2_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_server_envelope_reaches_all_targets() {
        // テスト項目: サーバ起点（送信者なし）の Envelope は全宛先に届く
        // given (前提条件):
        let registry = Registry::new();
        let (_alice, mut alice_rx) = registered_handle(&registry, "alice", None, 8).await;
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", None, 8).await;

        let envelope = Envelope::server(
            EnvelopeKind::Presence,
            json!({ "user_id": "alice", "online": true }),
            "2026-01-01T00:00:00+00:00".to_string(),
        );

        // when (操作):
        let delivery = dispatch(&registry, &envelope).await.unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 2);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_to_user_reaches_every_connection() {
        // テスト項目: 利用者宛の直接配送はその利用者の全接続に届く
        // given (前提条件):
        let registry = Registry::new();
        let (_a1, mut a1_rx) = registered_handle(&registry, "alice", None, 8).await;
        let (_a2, mut a2_rx) = registered_handle(&registry, "alice", Some("r1"), 8).await;
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", None, 8).await;

        let envelope = Envelope::server(
            EnvelopeKind::Receipt,
            json!({ "invoice_id": "inv-1" }),
            "2026-01-01T00:00:00+00:00".to_string(),
        );

        // when (操作):
        let delivery = dispatch_to_user(&registry, &UserId::new("alice".to_string()).unwrap(), &envelope)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 2);
        assert!(a1_rx.try_recv().is_ok());
        assert!(a2_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_to_missing_targets_delivers_zero() {
        // テスト項目: 宛先が存在しない dispatch はエラーではなく配送数 0
        // given (前提条件):
        let registry = Registry::new();
        let envelope = Envelope::server(
            EnvelopeKind::Chat,
            json!({ "content": "anyone?" }),
            "2026-01-01T00:00:00+00:00".to_string(),
        );

        // when (操作):
        let by_user =
            dispatch_to_user(&registry, &UserId::new("ghost".to_string()).unwrap(), &envelope)
                .await
                .unwrap();
        let by_room = dispatch_to_room(&registry, &room("empty"), &envelope)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(by_user.delivered, 0);
        assert_eq!(by_room.delivered, 0);
        assert!(by_user.evicted.is_empty());
        assert!(by_room.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_target_is_reported_for_eviction() {
        // テスト項目: キュー満杯の宛先は evicted として報告され、
        //             他の宛先への配送は完了する
        // given (前提条件):
        let registry = Registry::new();
        let (slow, _slow_rx) = registered_handle(&registry, "slow", Some("r1"), 1).await;
        let (_fast, mut fast_rx) = registered_handle(&registry, "fast", Some("r1"), 8).await;

        // slow のキューを先に埋めておく
        let filler = Envelope::server(
            EnvelopeKind::Chat,
            json!({ "content": "filler" }),
            "2026-01-01T00:00:00+00:00".to_string(),
        );
        dispatch_to_user(&registry, &UserId::new("slow".to_string()).unwrap(), &filler)
            .await
            .unwrap();

        // when (操作):
        let delivery = dispatch(&registry, &chat_from("carol", Some("r1")))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.evicted.len(), 1);
        assert_eq!(delivery.evicted[0].id(), slow.id());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_single_producer_ordering_is_preserved() {
        // テスト項目: 同一プロデューサが順に dispatch した E1, E2 は
        //             どの宛先のキューでも E1 が先に観測される
        // given (前提条件):
        let registry = Registry::new();
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", Some("r1"), 8).await;

        let mut first = chat_from("alice", Some("r1"));
        first.data = json!({ "content": "first" });
        let mut second = chat_from("alice", Some("r1"));
        second.data = json!({ "content": "second" });

        // when (操作):
        dispatch(&registry, &first).await.unwrap();
        dispatch(&registry, &second).await.unwrap();

        // then (期待する結果):
        let frame1 = bob_rx.try_recv().unwrap();
        let frame2 = bob_rx.try_recv().unwrap();
        assert!(frame1.contains("first"));
        assert!(frame2.contains("second"));
    }

    #[tokio::test]
    async fn test_closing_target_is_skipped_silently() {
        // テスト項目: 切断処理中の宛先はスキップされ、evicted にも載らない
        // given (前提条件):
        let registry = Registry::new();
        let (closing, _closing_rx) = registered_handle(&registry, "alice", Some("r1"), 8).await;
        let (_bob, mut bob_rx) = registered_handle(&registry, "bob", Some("r1"), 8).await;
        closing.begin_close();

        // when (操作):
        let delivery = dispatch(&registry, &chat_from("carol", Some("r1")))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivery.delivered, 1);
        assert!(delivery.evicted.is_empty());
        assert!(bob_rx.try_recv().is_ok());
    }
}
