// 站点配置发现
//
// ikec 的站点配置位于 ~/.ike/sites/<NAME>，这里只列出文件名。

use std::fs;
use std::path::Path;

use tracing::warn;

/// 列出目录中的站点配置名（按名称排序），目录不存在时返回空列表
pub fn list_profiles(sites_dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(sites_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if sites_dir.exists() {
                warn!(
                    "[Profiles] Cannot read {}: {}",
                    sites_dir.display(),
                    e
                );
            }
            return Vec::new();
        }
    };

    let mut profiles: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    profiles.sort();
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_sorted_files_only() {
        let dir = std::env::temp_dir().join(format!("shrewguard-sites-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("warehouse"), "").unwrap();
        fs::write(dir.join("office"), "").unwrap();

        assert_eq!(list_profiles(&dir), vec!["office", "warehouse"]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = std::env::temp_dir().join(format!("shrewguard-none-{}", uuid::Uuid::new_v4()));
        assert!(list_profiles(&dir).is_empty());
    }
}
