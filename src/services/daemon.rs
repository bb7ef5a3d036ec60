// iked 守护进程检查与启动
//
// iked 需要 root 权限，程序启动时检查一次，未运行则提权启动。

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::info;

/// iked 是否正在运行
pub async fn is_running() -> Result<bool> {
    let output = Command::new("pgrep")
        .arg("iked")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .context("无法执行 pgrep")?;
    Ok(!output.stdout.is_empty())
}

/// 提权启动 iked
pub async fn start(iked_path: &Path) -> Result<()> {
    let status = start_command(iked_path)
        .stdin(Stdio::null())
        .status()
        .await
        .with_context(|| format!("无法启动 {}", iked_path.display()))?;
    if !status.success() {
        bail!("{} exited with {}", iked_path.display(), status);
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn start_command(iked_path: &Path) -> Command {
    // 弹出管理员密码框
    let script = format!(
        "do shell script \"{}\" with administrator privileges",
        iked_path.display()
    );
    let mut cmd = Command::new("osascript");
    cmd.arg("-e").arg(script);
    cmd
}

#[cfg(not(target_os = "macos"))]
fn start_command(iked_path: &Path) -> Command {
    Command::new(iked_path)
}

/// 确保 iked 正在运行
pub async fn ensure_running(iked_path: &Path) -> Result<()> {
    if is_running().await? {
        return Ok(());
    }
    info!("[Daemon] Iked is not running. Starting daemon");
    start(iked_path).await.context("Cannot start iked daemon")?;
    if !is_running().await? {
        bail!("Cannot start iked");
    }
    Ok(())
}
