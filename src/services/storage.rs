// 本地数据持久化服务

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::files;
use crate::models::AppSettings;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/shrewguard
/// Linux: ~/.config/shrewguard
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join(files::APP_DIR);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("无法创建配置目录")?;
    }
    Ok(config_dir)
}

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(files::SETTINGS_FILE))
}

/// 设置存储（writeConfig 钩子）
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认位置的设置存储
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(get_settings_file()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 日志文件与设置文件放在同一目录
    pub fn log_file(&self) -> Result<PathBuf> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.exists() {
            fs::create_dir_all(dir).context("无法创建日志目录")?;
        }
        Ok(dir.join(files::LOG_FILE))
    }

    /// 加载应用设置，文件不存在时返回默认值
    pub fn load(&self) -> Result<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        let content = fs::read_to_string(&self.path).context("无法读取设置配置文件")?;
        let settings: AppSettings =
            serde_json::from_str(&content).context("无法解析设置配置文件")?;
        Ok(settings)
    }

    /// 保存应用设置
    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).context("无法创建配置目录")?;
            }
        }
        let content = serde_json::to_string_pretty(settings).context("无法序列化设置配置")?;
        fs::write(&self.path, content).context("无法写入设置配置文件")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (SettingsStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("shrewguard-test-{}", uuid::Uuid::new_v4()));
        (SettingsStore::new(dir.join("settings.json")), dir)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let (store, _dir) = temp_store();
        assert_eq!(store.load().unwrap(), AppSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let (store, dir) = temp_store();
        let mut settings = AppSettings::default();
        settings.ui.profile = Some("office".into());
        settings.ui.verbose_logging = true;
        settings.ike.ikec_path = "/opt/ike/bin/ikec".into();

        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_log_file_sits_next_to_settings() {
        let (store, dir) = temp_store();

        let log_file = store.log_file().unwrap();
        assert_eq!(log_file, dir.join(files::LOG_FILE));
        assert!(dir.is_dir());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (store, dir) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("无法解析设置配置文件"));

        fs::remove_dir_all(dir).unwrap();
    }
}
