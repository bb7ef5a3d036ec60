// 常量定义

/// ikec 输出中的协议里程碑（正则子串匹配）
pub mod patterns {
    /// 站点配置加载成功
    pub const CONFIG_LOADED: &str = r"config loaded for site";
    /// 站点配置加载失败
    pub const FAILED_TO_LOAD: &str = r"failed to load";
    /// 隧道已建立
    pub const TUNNEL_ENABLED: &str = r"tunnel enabled";
    /// 与 key daemon 断开
    pub const DETACHED: &str = r"detached from key daemon";
}

/// 发送给 ikec 的命令
pub mod commands {
    /// 连接
    pub const CONNECT: &str = "c";
}

/// 默认值
pub mod defaults {
    pub const IKEC_PATH: &str = "/usr/local/bin/ikec";
    pub const IKED_PATH: &str = "/usr/local/sbin/iked";
    /// 断线后重试前的等待（秒）
    pub const RETRY_SLEEP_SECS: u64 = 2;
    /// 加载配置 / 等待隧道建立的超时（秒）
    pub const SCAN_TIMEOUT_SECS: u64 = 30;
    /// 监控循环的轮询超时（秒）
    pub const MONITOR_POLL_SECS: u64 = 10;
    /// ping 间隔（秒）
    pub const PING_INTERVAL_SECS: u64 = 20;
}

/// 文件与目录名
pub mod files {
    pub const APP_DIR: &str = "shrewguard";
    pub const SETTINGS_FILE: &str = "settings.json";
    pub const LOG_FILE: &str = "shrewguard.log";
    /// 相对 home 目录的站点配置目录
    pub const IKE_SITES_DIR: &str = ".ike/sites";
}

/// 输出扫描缓冲区上限（字节），超出时只保留尾部
pub const MAX_SCAN_BUFFER: usize = 64 * 1024;
