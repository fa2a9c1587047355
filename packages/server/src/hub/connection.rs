//! 接続ごとの状態（Connection Record）
//!
//! ## 所有権
//!
//! - transport の読み書きハーフと送信キューの受信側は、それぞれちょうど
//!   1 つの Ingress Pump / Egress Pump だけが参照する
//! - Registry と Router はこのハンドル（`Arc<ConnectionHandle>`）経由で
//!   送信キューの送信側にだけ触れる。他の接続のタスクが transport に
//!   触れることはない

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::domain::{ConnectionId, PeerIdentity, RoomName, UserId};

/// 接続ごとのプロトコル状態機械
///
/// `Connecting -> Active -> Closing -> Closed` の一方向にだけ進む。
/// `Closing` / `Closed` から `Active` へ戻る遷移は存在しない。切断された
/// リンクは新しい Connection Record として再接続する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// transport は accept 済み、Registry 未登録
    Connecting = 0,
    /// 登録済み（同時に所属できるルームは高々 1 つ）
    Active = 1,
    /// 切断処理が開始され、送信キューを排出・破棄中
    Closing = 2,
    /// 両 Pump が終了し、資源解放済み
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// 送信キューへの enqueue 失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// 宛先が排出しきれていない（キュー満杯）。呼び出し側は宛先を即座に切断する
    Full,
    /// 宛先は切断処理中
    Closed,
}

/// Connection Record: リンクごとにハブが追跡する状態
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: PeerIdentity,
    /// 現在のルーム。Registry のロック配下でのみ書き換えられる
    room: StdRwLock<Option<RoomName>>,
    /// 有界 FIFO 送信キューの送信側。排出は自身の Egress Pump のみが行う
    outbound: mpsc::Sender<String>,
    /// 最終アクティビティ時刻（Unix ミリ秒）。
    /// inbound フレームとキープアライブ応答の観測で更新される
    last_seen: AtomicI64,
    state: AtomicU8,
    /// 切断開始を両 Pump に伝えるシグナル
    closed_tx: watch::Sender<bool>,
    /// 未終了の Pump 数。0 になった時点で `Closed` へ遷移する
    pumps_remaining: AtomicU8,
}

impl ConnectionHandle {
    /// Connection Record と、その送信キューの受信側を作る。
    ///
    /// 受信側はちょうど 1 つの Egress Pump に渡すこと。
    pub fn new(
        identity: PeerIdentity,
        room: Option<RoomName>,
        queue_capacity: usize,
        now_millis: i64,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let (closed_tx, _closed_rx) = watch::channel(false);
        let handle = Arc::new(Self {
            id: ConnectionId::generate(),
            identity,
            room: StdRwLock::new(room),
            outbound,
            last_seen: AtomicI64::new(now_millis),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed_tx,
            pumps_remaining: AtomicU8::new(2),
        });
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn room(&self) -> Option<RoomName> {
        self.room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_room(&self, room: Option<RoomName>) {
        *self.room.write().unwrap_or_else(PoisonError::into_inner) = room;
    }

    /// アクティビティの観測を記録する
    pub fn touch(&self, now_millis: i64) {
        self.last_seen.store(now_millis, Ordering::Relaxed);
    }

    pub fn last_seen_millis(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// 切断処理が始まっているかどうか
    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) >= ConnectionState::Closing as u8
    }

    /// `Connecting -> Active`。Register 成功時に Registry が呼ぶ
    pub(crate) fn mark_active(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 切断処理の開始。冪等で、最初に遷移させた呼び出しだけが true を返す。
    /// 両 Pump を起こして送信キューの排出・破棄を促す
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // 受信側が未購読でも値は更新する（購読時に is_closing で拾える）
                    self.closed_tx.send_replace(true);
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Pump の終了を記録する。両方が終了した時点で `Closed` へ遷移する
    pub fn pump_finished(&self) {
        let before = self.pumps_remaining.fetch_sub(1, Ordering::AcqRel);
        if before <= 1 {
            self.state
                .store(ConnectionState::Closed as u8, Ordering::Release);
        }
    }

    /// 切断シグナルの購読。Pump は select でこれと transport / キューを併せて待つ。
    /// 購読後に begin_close が走れば `changed()` は必ず起きる
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Router からの非ブロッキング enqueue
    pub(crate) fn enqueue(&self, frame: String) -> Result<(), EnqueueError> {
        if !self.is_active() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}
