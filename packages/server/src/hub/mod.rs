//! リアルタイム接続ハブ
//!
//! 多数の双方向クライアントリンクを受け入れ、各リンクがどの利用者と
//! どのルームに属すかを追跡し、定義された配送・順序セマンティクスで
//! Envelope を転送する。
//!
//! ## 構成
//!
//! - Registry: 会員索引の唯一の所有者
//! - Router: 配送先の決定と非ブロッキング enqueue
//! - Pump: 接続ごとの転送タスク（Ingress / Egress）
//! - Sweeper: アイドル接続の定期退去
//!
//! `Hub` はこれらを束ねるファサードで、REST ハンドラや背景ジョブが
//! サーバ起点のイベントを注入する面（dispatch_to_user / dispatch_to_room /
//! broadcast / is_user_online / online_user_ids）もここにある。

mod config;
mod connection;
mod pump;
mod registry;
mod router;
mod sweeper;

pub use config::HubConfig;
pub use connection::{ConnectionHandle, ConnectionState, EnqueueError};
pub use pump::{egress_pump, ingress_pump};
pub use registry::{Deregistered, Registered, Registry, RegistryError};
pub use router::{Delivery, DispatchError};
pub use sweeper::spawn_sweeper;

use std::sync::Arc;

use tokio::sync::mpsc;

use hiroba_shared::time::{Clock, timestamp_to_rfc3339};

use crate::domain::{
    ClientMetadata, ConnectionId, ConnectionLog, ConnectionStatus, Envelope, EnvelopeKind,
    PeerIdentity, RoomName, SenderInfo, UserId,
};

/// 切断の契機。ログと永続化の記録に使う
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// transport の読み書きが失敗した
    TransportError,
    /// クライアントが明示的に切断した（close フレーム / ストリーム終端）
    PeerClosed,
    /// アイドルウィンドウを超過し Sweeper が退去させた
    IdleTimeout,
    /// 送信キュー満杯により応答不能と判定された
    SlowConsumer,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::PeerClosed => "peer_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::SlowConsumer => "slow_consumer",
        }
    }
}

/// リアルタイム接続ハブのファサード
pub struct Hub {
    registry: Registry,
    log: Arc<dyn ConnectionLog>,
    clock: Arc<dyn Clock>,
    config: HubConfig,
}

impl Hub {
    pub fn new(log: Arc<dyn ConnectionLog>, clock: Arc<dyn Clock>, config: HubConfig) -> Self {
        Self {
            registry: Registry::new(),
            log,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// 現在時刻の RFC 3339 表現（Envelope の刻印用）
    pub fn now_rfc3339(&self) -> String {
        timestamp_to_rfc3339(self.clock.now_millis())
    }

    /// 新しいリンクを受け入れ、Connection Record を作って Registry へ登録する。
    ///
    /// 返り値の Receiver は送信キューの受信側で、そのまま Egress Pump へ渡すこと。
    /// 利用者にとって最初の同時接続なら「user online」のプレゼンス通知を
    /// ブロードキャストする。永続化の記録は fire-and-forget で、
    /// 失敗しても登録は成立する。
    pub async fn register_connection(
        &self,
        identity: PeerIdentity,
        room: Option<RoomName>,
    ) -> Result<(Arc<ConnectionHandle>, mpsc::Receiver<String>), RegistryError> {
        let (handle, rx) =
            ConnectionHandle::new(identity, room, self.config.queue_capacity, self.now_millis());
        let outcome = self.registry.register(handle.clone()).await?;
        tracing::info!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            room = handle.room().as_ref().map(RoomName::as_str),
            "connection registered"
        );

        {
            let log = self.log.clone();
            let recorded = handle.clone();
            tokio::spawn(async move {
                let metadata = ClientMetadata {
                    display_name: recorded.identity().display_name.clone(),
                    role: recorded.identity().role.clone(),
                };
                if let Err(e) = log
                    .record_connected(recorded.user_id(), recorded.id(), recorded.room(), &metadata)
                    .await
                {
                    tracing::warn!(
                        connection_id = %recorded.id(),
                        error = %e,
                        "failed to record connection, hub indexes remain authoritative"
                    );
                }
            });
        }

        if outcome.first_for_user {
            let envelope = Envelope::presence(
                handle.user_id(),
                &handle.identity().display_name,
                true,
                self.now_rfc3339(),
            );
            if let Err(e) = self.dispatch(envelope).await {
                tracing::error!(error = %e, "failed to broadcast online presence");
            }
        }

        Ok((handle, rx))
    }

    /// 切断処理。Ingress Pump / Egress Pump / Sweeper / ハンドラのどこから
    /// 重複・並行して呼ばれても安全（冪等）。
    ///
    /// プレゼンス通知のブロードキャストが新たな遅い消費者を炙り出した場合は、
    /// それらも同じ経路で順に退去させる（worklist、再帰なし）。
    pub async fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) {
        let mut worklist = self.teardown(id, reason).await;
        while let Some((next_id, next_reason)) = worklist.pop() {
            worklist.extend(self.teardown(next_id, next_reason).await);
        }
    }

    /// 1 接続の退去。プレゼンス通知が evicted と判定した後続の宛先を返す
    async fn teardown(
        &self,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> Vec<(ConnectionId, DisconnectReason)> {
        let Some(outcome) = self.registry.deregister(id).await else {
            return Vec::new();
        };
        let handle = outcome.handle;
        tracing::info!(
            connection_id = %id,
            user_id = %handle.user_id(),
            reason = reason.as_str(),
            "connection deregistered"
        );

        {
            let log = self.log.clone();
            tokio::spawn(async move {
                if let Err(e) = log
                    .record_status_changed(id, ConnectionStatus::Disconnected)
                    .await
                {
                    tracing::warn!(connection_id = %id, error = %e, "failed to record disconnection");
                }
            });
        }

        let mut follow_ups = Vec::new();
        if outcome.last_for_user {
            let envelope = Envelope::presence(
                handle.user_id(),
                &handle.identity().display_name,
                false,
                self.now_rfc3339(),
            );
            match router::dispatch(&self.registry, &envelope).await {
                Ok(delivery) => follow_ups.extend(
                    delivery
                        .evicted
                        .iter()
                        .map(|h| (h.id(), DisconnectReason::SlowConsumer)),
                ),
                Err(e) => tracing::error!(error = %e, "failed to broadcast offline presence"),
            }
        }
        follow_ups
    }

    /// ルーム所属の付け替え。プレゼンスイベントは発火しない
    pub async fn change_room(
        &self,
        id: ConnectionId,
        room: Option<RoomName>,
    ) -> Result<(), RegistryError> {
        self.registry.change_room(id, room.clone()).await?;
        tracing::debug!(
            connection_id = %id,
            room = room.as_ref().map(RoomName::as_str),
            "room changed"
        );
        Ok(())
    }

    /// Ingress Pump から渡された inbound フレーム 1 つを処理する。
    ///
    /// - 不正なフレームは破棄するだけで、接続は落とさない
    /// - `join` / `leave` はルーティングせず Registry のルーム変更として扱う
    /// - `ping` は liveness の更新のみ（更新自体は Pump 側で済んでいる）
    /// - それ以外は送信者と現在時刻を刻印して Router へ渡す
    pub async fn handle_inbound(&self, handle: &ConnectionHandle, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    connection_id = %handle.id(),
                    error = %e,
                    "discarding malformed inbound frame"
                );
                return;
            }
        };

        match envelope.kind {
            EnvelopeKind::Ping => {}
            EnvelopeKind::Join => match envelope.room {
                Some(room) => {
                    if let Err(e) = self.change_room(handle.id(), Some(room)).await {
                        tracing::warn!(connection_id = %handle.id(), error = %e, "join failed");
                    }
                }
                None => {
                    tracing::warn!(
                        connection_id = %handle.id(),
                        "discarding join frame without room"
                    );
                }
            },
            EnvelopeKind::Leave => {
                if let Err(e) = self.change_room(handle.id(), None).await {
                    tracing::warn!(connection_id = %handle.id(), error = %e, "leave failed");
                }
            }
            _ => {
                let mut envelope = envelope;
                envelope.sender = Some(SenderInfo::from(handle.identity()));
                envelope.timestamp = self.now_rfc3339();
                if let Err(e) = self.dispatch(envelope).await {
                    tracing::error!(connection_id = %handle.id(), error = %e, "dispatch failed");
                }
            }
        }
    }

    /// `envelope.room` に従った配送。enqueue に成功した宛先数を返す。
    /// キュー満杯で応答不能と判定された宛先はこの呼び出しの中で退去させる
    pub async fn dispatch(&self, envelope: Envelope) -> Result<usize, DispatchError> {
        let delivery = router::dispatch(&self.registry, &envelope).await?;
        self.evict(delivery.evicted).await;
        Ok(delivery.delivered)
    }

    /// 利用者宛の直接配送。登録済み接続が無ければ配送数 0 を返す
    /// （呼び出し側はオフライン通知などの代替経路を選べる）
    pub async fn dispatch_to_user(
        &self,
        user_id: &UserId,
        envelope: Envelope,
    ) -> Result<usize, DispatchError> {
        let delivery = router::dispatch_to_user(&self.registry, user_id, &envelope).await?;
        self.evict(delivery.evicted).await;
        Ok(delivery.delivered)
    }

    /// ルーム宛の直接配送。配送数 0 はエラーではない
    pub async fn dispatch_to_room(
        &self,
        room: &RoomName,
        envelope: Envelope,
    ) -> Result<usize, DispatchError> {
        let delivery = router::dispatch_to_room(&self.registry, room, &envelope).await?;
        self.evict(delivery.evicted).await;
        Ok(delivery.delivered)
    }

    /// 全登録接続への配送（送信者付きなら送信者の接続は除く）
    pub async fn broadcast(&self, envelope: Envelope) -> Result<usize, DispatchError> {
        let mut envelope = envelope;
        envelope.room = None;
        self.dispatch(envelope).await
    }

    pub async fn is_user_online(&self, user_id: &UserId) -> bool {
        self.registry.is_user_online(user_id).await
    }

    pub async fn online_user_ids(&self) -> Vec<UserId> {
        self.registry.online_user_ids().await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// 1 周期分の liveness sweep。退去させた接続数を返す。
    ///
    /// アイドルウィンドウを超えた接続を（transport エラーが出ていなくても）
    /// 退去させたあと、永続化側に残った残骸も切断済みへ倒す。
    pub async fn sweep_once(&self) -> usize {
        let idle_millis = self.config.idle_timeout.as_millis() as i64;
        let cutoff = self.now_millis() - idle_millis;
        let stale = self.registry.idle_since(cutoff).await;
        let evicted = stale.len();
        for handle in stale {
            tracing::info!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                "evicting idle connection"
            );
            self.disconnect(handle.id(), DisconnectReason::IdleTimeout).await;
        }

        match self.log.mark_stale_disconnected().await {
            Ok(marked) if marked > 0 => {
                tracing::info!(marked, "marked stale persisted connections as disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to mark stale persisted connections");
            }
        }

        evicted
    }

    async fn evict(&self, evicted: Vec<Arc<ConnectionHandle>>) {
        for handle in evicted {
            self.disconnect(handle.id(), DisconnectReason::SlowConsumer).await;
        }
    }
}
