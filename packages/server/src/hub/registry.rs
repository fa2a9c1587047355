//! Registry: 会員索引の唯一の所有者
//!
//! ## 不変条件
//!
//! 3 つの索引（全接続集合・利用者索引・ルーム索引）は単一の排他ドメイン
//! （1 本の RwLock）の下で常に一体として更新される。登録・削除・ルーム変更が
//! 交錯しても、途中状態が並行する読み手から観測されることはない。
//!
//! - 接続は登録されているとき、かつそのときに限り全接続集合に現れる
//! - 登録されているとき、かつそのときに限り利用者索引の自分の項目に現れる
//! - 登録されていてルームに所属しているとき、かつそのときに限り
//!   ルーム索引の該当項目に現れる
//!
//! 空になった索引項目はその場で取り除くため、索引に残った項目は常に非空。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{ConnectionId, RoomName, UserId};

use super::connection::ConnectionHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),
}

/// Register の結果
#[derive(Debug, Clone, Copy)]
pub struct Registered {
    /// この登録が利用者にとって最初の同時接続だったか。
    /// 呼び出し側は「user online」のプレゼンス通知の判定に使う
    pub first_for_user: bool,
}

/// Deregister の結果
pub struct Deregistered {
    pub handle: Arc<ConnectionHandle>,
    /// この削除で利用者の登録済み接続が尽きたか。
    /// 呼び出し側は「user offline」のプレゼンス通知の判定に使う
    pub last_for_user: bool,
}

#[derive(Default)]
struct Indexes {
    /// 全接続集合
    connections: HashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// 利用者索引（同一利用者の複数同時ログインを許す）
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    /// ルーム索引
    by_room: HashMap<RoomName, HashSet<ConnectionId>>,
}

/// 会員索引の中央権威
///
/// 索引を書き換えてよいのはこの型のメソッドだけ。
pub struct Registry {
    inner: RwLock<Indexes>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes::default()),
        }
    }

    /// 3 索引への追加を 1 ステップで行う
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Result<Registered, RegistryError> {
        let mut inner = self.inner.write().await;
        let id = handle.id();
        if inner.connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let user_id = handle.user_id().clone();
        let first_for_user = !inner.by_user.contains_key(&user_id);
        inner.by_user.entry(user_id).or_default().insert(id);
        if let Some(room) = handle.room() {
            inner.by_room.entry(room).or_default().insert(id);
        }
        handle.mark_active();
        inner.connections.insert(id, handle);

        Ok(Registered { first_for_user })
    }

    /// 3 索引からの削除を 1 ステップで行う。冪等: 未登録なら None
    pub async fn deregister(&self, id: ConnectionId) -> Option<Deregistered> {
        let mut inner = self.inner.write().await;
        let handle = inner.connections.remove(&id)?;
        handle.begin_close();

        let user_id = handle.user_id().clone();
        let mut last_for_user = false;
        if let Some(ids) = inner.by_user.get_mut(&user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                inner.by_user.remove(&user_id);
                last_for_user = true;
            }
        }
        if let Some(room) = handle.room() {
            if let Some(ids) = inner.by_room.get_mut(&room) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.by_room.remove(&room);
                }
            }
        }

        Some(Deregistered {
            handle,
            last_for_user,
        })
    }

    /// ルーム索引だけを付け替える。利用者索引には触れず、
    /// プレゼンスイベントの再発火も起こさない
    pub async fn change_room(
        &self,
        id: ConnectionId,
        new_room: Option<RoomName>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let handle = inner
            .connections
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotRegistered(id))?;

        let old_room = handle.room();
        if old_room == new_room {
            return Ok(());
        }

        if let Some(room) = old_room {
            if let Some(ids) = inner.by_room.get_mut(&room) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.by_room.remove(&room);
                }
            }
        }
        if let Some(room) = new_room.clone() {
            inner.by_room.entry(room).or_default().insert(id);
        }
        handle.set_room(new_room);

        Ok(())
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner.connections.get(&id).cloned()
    }

    /// 全登録接続のスナップショット
    pub async fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner.connections.values().cloned().collect()
    }

    pub async fn connections_by_user(&self, user_id: &UserId) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn connections_by_room(&self, room: &RoomName) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .by_room
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_user_online(&self, user_id: &UserId) -> bool {
        let inner = self.inner.read().await;
        inner.by_user.contains_key(user_id)
    }

    /// 登録済み接続を 1 本以上持つ利用者の一覧（ID でソート済み）
    pub async fn online_user_ids(&self) -> Vec<UserId> {
        let inner = self.inner.read().await;
        let mut ids: Vec<UserId> = inner.by_user.keys().cloned().collect();
        // Sort by user_id for consistent ordering
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 最終アクティビティが cutoff より古い接続（Sweeper 用）
    pub async fn idle_since(&self, cutoff_millis: i64) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|handle| handle.last_seen_millis() < cutoff_millis)
            .cloned()
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
