// 会话配置

use std::time::Duration;

use crate::models::AppSettings;

/// 计时配置的下限：零值会让轮询与重试变成忙等
const MIN_PERIOD: Duration = Duration::from_secs(1);

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs).max(MIN_PERIOD)
}

/// 会话状态机使用的配置
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// 断线后重新发送连接命令前的等待
    pub retry_sleep: Duration,
    /// 加载配置 / 等待隧道建立的扫描超时
    pub scan_timeout: Duration,
    /// 监控循环的轮询超时
    pub monitor_poll: Duration,
    /// 存活探测（None 表示不启用）
    pub ping: Option<PingConfig>,
}

/// 存活探测配置
#[derive(Clone, Debug)]
pub struct PingConfig {
    pub host: String,
    pub interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

impl SessionConfig {
    /// 从持久化设置构建，各项时长至少为 1 秒
    pub fn from_settings(settings: &AppSettings) -> Self {
        let conn = &settings.connection;
        Self {
            retry_sleep: period(conn.retry_sleep_secs),
            scan_timeout: period(conn.scan_timeout_secs),
            monitor_poll: period(conn.monitor_poll_secs),
            ping: conn.ping_target().map(|host| PingConfig {
                host: host.to_string(),
                interval: period(conn.ping_interval_secs),
            }),
        }
    }
}
