// 隧道存活探测
//
// 隧道建立后按固定间隔 ping 配置的主机，只记录日志，不影响会话状态。

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::TunnelError;
use super::state::TunnelState;

/// 探测周期下限，tokio 的 interval 不接受零周期
const MIN_PING_PERIOD: Duration = Duration::from_millis(10);

/// 单次可达性探测
#[async_trait]
pub trait Prober: Send + Sync {
    /// 主机可达返回 true
    async fn probe(&self, host: &str) -> Result<bool, TunnelError>;
}

/// 调用系统 ping 命令
pub struct SystemPing;

#[async_trait]
impl Prober for SystemPing {
    async fn probe(&self, host: &str) -> Result<bool, TunnelError> {
        let status = Command::new("ping")
            .args(["-c", "1", host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;
        Ok(status.success())
    }
}

/// 运行中的探测任务
pub struct PingerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PingerHandle {
    /// 启动探测任务，首次探测立即执行
    pub fn start(
        host: String,
        interval: Duration,
        prober: Arc<dyn Prober>,
        state: watch::Receiver<TunnelState>,
    ) -> Self {
        let token = CancellationToken::new();
        let interval = interval.max(MIN_PING_PERIOD);
        let task = tokio::spawn(run_ping_loop(host, interval, prober, state, token.clone()));
        Self { token, task }
    }

    /// 取消并等待任务结束，返回后不会再有探测发出
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("[Ping] Ping task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn run_ping_loop(
    host: String,
    interval: Duration,
    prober: Arc<dyn Prober>,
    state: watch::Receiver<TunnelState>,
    token: CancellationToken,
) {
    info!("[Ping] Pinging {} every {}s", host, interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !state.borrow().contains(TunnelState::CONNECTED) {
            debug!("[Ping] Tunnel no longer connected, stopping");
            break;
        }

        debug!("[Ping] Pinging host {}", host);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = prober.probe(&host) => match result {
                Ok(true) => debug!("[Ping] Successfully pinged host"),
                Ok(false) => error!("[Ping] Host {} unreachable", host),
                Err(e) => error!("[Ping] Exception while pinging host: {}", e),
            },
        }
    }
    debug!("[Ping] Ping loop for {} finished", host);
}
