// Settings 配置数据结构

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, files};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub ui: UiSettings,
    pub ike: IkeSettings,
    pub connection: ConnectionSettings,
}

// ======================== 界面设置 ========================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// 当前选中的站点配置名
    pub profile: Option<String>,
    /// 详细日志（DEBUG 级别）
    pub verbose_logging: bool,
}

impl UiSettings {
    /// 非空的已选配置名
    pub fn selected_profile(&self) -> Option<&str> {
        self.profile
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

// ======================== IKE 设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkeSettings {
    pub ikec_path: String,
    pub iked_path: String,
    /// 站点配置目录，为空时使用 ~/.ike/sites
    pub sites_dir: String,
}

impl Default for IkeSettings {
    fn default() -> Self {
        Self {
            ikec_path: defaults::IKEC_PATH.to_string(),
            iked_path: defaults::IKED_PATH.to_string(),
            sites_dir: String::new(),
        }
    }
}

impl IkeSettings {
    /// ikec 路径，为空时回退到默认值
    pub fn ikec(&self) -> PathBuf {
        non_empty_or(&self.ikec_path, defaults::IKEC_PATH)
    }

    /// iked 路径，为空时回退到默认值
    pub fn iked(&self) -> PathBuf {
        non_empty_or(&self.iked_path, defaults::IKED_PATH)
    }

    pub fn sites(&self) -> Option<PathBuf> {
        if self.sites_dir.trim().is_empty() {
            dirs::home_dir().map(|home| home.join(files::IKE_SITES_DIR))
        } else {
            Some(PathBuf::from(&self.sites_dir))
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> PathBuf {
    if value.trim().is_empty() {
        PathBuf::from(fallback)
    } else {
        PathBuf::from(value)
    }
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// 断线重试前等待（秒）
    pub retry_sleep_secs: u64,
    /// 加载配置 / 等待隧道建立的超时（秒）
    pub scan_timeout_secs: u64,
    /// 监控轮询超时（秒）
    pub monitor_poll_secs: u64,
    /// ping 间隔（秒）
    pub ping_interval_secs: u64,
    pub ping_host: Option<String>,
    pub ping_enabled: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry_sleep_secs: defaults::RETRY_SLEEP_SECS,
            scan_timeout_secs: defaults::SCAN_TIMEOUT_SECS,
            monitor_poll_secs: defaults::MONITOR_POLL_SECS,
            ping_interval_secs: defaults::PING_INTERVAL_SECS,
            ping_host: None,
            ping_enabled: false,
        }
    }
}

impl ConnectionSettings {
    /// 只有开启且配置了主机时才 ping
    pub fn ping_target(&self) -> Option<&str> {
        if !self.ping_enabled {
            return None;
        }
        self.ping_host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.connection.retry_sleep_secs, 2);
        assert_eq!(settings.connection.monitor_poll_secs, 10);
        assert_eq!(settings.connection.ping_interval_secs, 20);
        assert_eq!(settings.ike.ikec(), PathBuf::from("/usr/local/bin/ikec"));
        assert!(settings.ui.selected_profile().is_none());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let json = r#"{ "ui": { "profile": "office" }, "ike": { "ikec_path": "" } }"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.ui.selected_profile(), Some("office"));
        assert!(!settings.ui.verbose_logging);
        assert_eq!(settings.ike.ikec(), PathBuf::from(defaults::IKEC_PATH));
        assert_eq!(settings.ike.iked(), PathBuf::from(defaults::IKED_PATH));
        assert_eq!(settings.connection, ConnectionSettings::default());
    }

    #[test]
    fn test_ping_target_requires_flag_and_host() {
        let mut conn = ConnectionSettings::default();
        conn.ping_host = Some("10.1.1.1".into());
        assert_eq!(conn.ping_target(), None);

        conn.ping_enabled = true;
        assert_eq!(conn.ping_target(), Some("10.1.1.1"));

        conn.ping_host = Some("  ".into());
        assert_eq!(conn.ping_target(), None);
    }

    #[test]
    fn test_blank_profile_is_not_selected() {
        let ui = UiSettings {
            profile: Some("   ".into()),
            verbose_logging: false,
        };
        assert_eq!(ui.selected_profile(), None);
    }
}
