// 日志初始化
//
// 同时输出到终端和日志文件，可以通过 RUST_LOG 环境变量覆盖级别，
// 详细日志开关在运行时通过 reload 句柄切换。

use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// 运行时调整日志级别的句柄
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// 切换详细日志（DEBUG / INFO）
    pub fn set_verbose(&self, verbose: bool) -> Result<()> {
        self.filter
            .reload(build_filter(verbose))
            .context("无法更新日志级别")
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::from_default_env().add_directive(level.into())
}

/// 初始化日志系统
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(build_filter(verbose));

    let file_layer = match log_file {
        Some(path) => {
            let dir = path.parent().context("日志文件路径没有父目录")?;
            let name = path.file_name().context("日志文件路径没有文件名")?;
            let appender = tracing_appender::rolling::never(dir, name);
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("无法初始化日志系统")?;

    Ok(LogHandle { filter: handle })
}
