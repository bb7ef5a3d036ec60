// 隧道错误类型定义

use std::time::Duration;

use thiserror::Error;

/// 隧道错误类型
#[derive(Debug, Error)]
pub enum TunnelError {
    /// 在限定时间内没有看到期望的输出
    #[error("Timeout after {}s while waiting for {stage}", .elapsed.as_secs())]
    Timeout {
        stage: &'static str,
        elapsed: Duration,
    },

    /// ikec 明确报告失败（例如配置加载失败）
    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    /// 进程意外退出或输出流关闭
    #[error("Process fault: {0}")]
    ProcessFault(String),

    /// 无法启动 ikec
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// IO 错误（写入进程输入等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 进程已经被终止
    #[error("Process already terminated")]
    ProcessGone,

    /// 配置名无效
    #[error("Invalid profile name: {0:?}")]
    InvalidProfile(String),
}
