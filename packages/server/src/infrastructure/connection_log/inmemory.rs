//! InMemory ConnectionLog 実装
//!
//! ドメイン層が定義する ConnectionLog trait の具体的な実装。
//! HashMap をインメモリの接続台帳として使用する。
//!
//! デモ用サーバと統合テストのための実装で、本番相当の永続化
//! （RDBMS など）は外部コラボレータとして差し替える想定。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use hiroba_shared::time::Clock;

use crate::domain::{
    ClientMetadata, ConnectionId, ConnectionLog, ConnectionLogError, ConnectionStatus, RoomName,
    UserId,
};

#[derive(Debug, Clone)]
struct LogRecord {
    user_id: UserId,
    status: ConnectionStatus,
    /// 最終更新時刻（Unix ミリ秒）。stale 判定に使う
    updated_at_millis: i64,
}

/// インメモリ ConnectionLog 実装
pub struct InMemoryConnectionLog {
    records: Mutex<HashMap<ConnectionId, LogRecord>>,
    clock: Arc<dyn Clock>,
    /// この時間更新が無い connected 記録は stale とみなす
    stale_after: Duration,
}

impl InMemoryConnectionLog {
    pub fn new(clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            stale_after,
        }
    }

    /// テスト・デバッグ用: 記録済みの接続状態を返す
    pub async fn status_of(&self, connection_id: ConnectionId) -> Option<ConnectionStatus> {
        let records = self.records.lock().await;
        records.get(&connection_id).map(|r| r.status)
    }

    pub async fn len(&self) -> usize {
        let records = self.records.lock().await;
        records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConnectionLog for InMemoryConnectionLog {
    async fn record_connected(
        &self,
        user_id: &UserId,
        connection_id: ConnectionId,
        _room: Option<RoomName>,
        _metadata: &ClientMetadata,
    ) -> Result<(), ConnectionLogError> {
        let mut records = self.records.lock().await;
        records.insert(
            connection_id,
            LogRecord {
                user_id: user_id.clone(),
                status: ConnectionStatus::Connected,
                updated_at_millis: self.clock.now_millis(),
            },
        );
        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            "connection recorded"
        );
        Ok(())
    }

    async fn record_status_changed(
        &self,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    ) -> Result<(), ConnectionLogError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&connection_id) {
            record.status = status;
            record.updated_at_millis = self.clock.now_millis();
            tracing::debug!(
                connection_id = %connection_id,
                status = status.as_str(),
                "connection status recorded"
            );
        } else {
            tracing::debug!(
                connection_id = %connection_id,
                "status change for unknown connection, ignoring"
            );
        }
        Ok(())
    }

    async fn list_active_connection_ids(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConnectionId>, ConnectionLogError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|(_, r)| r.status == ConnectionStatus::Connected && r.user_id == *user_id)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn mark_stale_disconnected(&self) -> Result<u64, ConnectionLogError> {
        let cutoff = self.clock.now_millis() - self.stale_after.as_millis() as i64;
        let mut records = self.records.lock().await;
        let mut marked = 0;
        for record in records.values_mut() {
            if record.status == ConnectionStatus::Connected && record.updated_at_millis < cutoff {
                record.status = ConnectionStatus::Disconnected;
                marked += 1;
            }
        }
        Ok(marked)
    }
}
