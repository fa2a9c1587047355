//! ハブの調整パラメータ

use std::time::Duration;

/// キューイング・キープアライブ・liveness sweep の調整値
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// 接続ごとの送信キュー容量（フレーム数）。
    /// 満杯の宛先は応答不能とみなされ、ブロックせず即座に切断される
    pub queue_capacity: usize,
    /// Egress Pump がキープアライブ probe を書き込む間隔
    pub keepalive_interval: Duration,
    /// Liveness Sweeper の起動周期
    pub sweep_interval: Duration,
    /// この時間アクティビティが観測されない接続は死んだものとみなす
    pub idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            keepalive_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}
