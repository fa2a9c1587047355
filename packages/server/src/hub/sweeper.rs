//! Liveness Sweeper: 応答の途絶えた接続を定期的に退去させる
//!
//! transport エラーが出ないまま沈黙した経路（切断検知が来ないネットワーク）を
//! 回収するための仕組み。実際の判定と退去は `Hub::sweep_once` が行う。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Hub;

/// Sweeper を周期タスクとして起動する
pub fn spawn_sweeper(hub: Arc<Hub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hub.config().sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval の最初の即時 tick は読み捨てる
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = hub.sweep_once().await;
            if evicted > 0 {
                tracing::info!(evicted, "liveness sweep evicted idle connections");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockConnectionLog, PeerIdentity, UserId};
    use crate::hub::HubConfig;
    use hiroba_shared::time::FixedClock;
    use std::time::Duration;

    fn identity(user: &str) -> PeerIdentity {
        PeerIdentity::new(
            UserId::new(user.to_string()).unwrap(),
            user.to_string(),
            "tenant".to_string(),
        )
    }

    #[tokio::test]
    async fn test_spawned_sweeper_evicts_idle_connection() {
        // テスト項目: 周期タスクとしての Sweeper が 1 周期でアイドル接続を退去させる
        // given (前提条件):
        let mut log = MockConnectionLog::new();
        log.expect_record_connected().returning(|_, _, _, _| Ok(()));
        log.expect_record_status_changed().returning(|_, _| Ok(()));
        log.expect_mark_stale_disconnected().returning(|| Ok(0));

        let hub = Arc::new(Hub::new(
            Arc::new(log),
            Arc::new(FixedClock::new(1_700_000_000_000)),
            HubConfig {
                queue_capacity: 8,
                sweep_interval: Duration::from_millis(10),
                ..HubConfig::default()
            },
        ));
        let (stale, _rx) = hub
            .register_connection(identity("alice"), None)
            .await
            .unwrap();
        let idle_millis = hub.config().idle_timeout.as_millis() as i64;
        stale.touch(hub.now_millis() - idle_millis - 1);

        // when (操作):
        let sweeper = spawn_sweeper(hub.clone());
        tokio::time::timeout(Duration::from_secs(1), async {
            while hub.connection_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweeper should evict the idle connection");
        sweeper.abort();

        // then (期待する結果):
        assert_eq!(hub.connection_count().await, 0);
        assert!(stale.is_closing());
    }
}
