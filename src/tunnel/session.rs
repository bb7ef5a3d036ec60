// 隧道会话状态机
//
// 一个后台任务从头到尾驱动一个会话：
// 拉起 ikec -> 等待配置加载 -> 发送连接命令 -> 等待隧道建立 -> 监控 -> 断线重试。
// 状态只在该任务内修改，每次修改都先同步通知观察者。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::commands;

use super::config::SessionConfig;
use super::error::TunnelError;
use super::notifier::StatusNotifier;
use super::pinger::{PingerHandle, Prober};
use super::process::{ClientLauncher, ProcessHandle};
use super::scanner::{
    OutputScanner, ScanOutcome, CONFIG_LOADED, DETACHED, FAILED_TO_LOAD, TUNNEL_ENABLED,
};
use super::state::{is_valid_transition, Phase, TunnelState};

/// 管理器与状态机任务共享的控制部分
pub struct SessionControl {
    id: String,
    profile: String,
    stop: CancellationToken,
    process: Mutex<Option<ProcessHandle>>,
}

impl SessionControl {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// 请求断开：可在任意任务中调用，可重复调用
    ///
    /// 终止进程会关闭输出流，从而解除状态机中阻塞的扫描。
    pub async fn request_stop(&self) {
        self.stop.cancel();
        if let Some(process) = self.current_process() {
            process.terminate().await;
        }
    }

    fn current_process(&self) -> Option<ProcessHandle> {
        match self.process.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_process(&self, process: Option<ProcessHandle>) {
        match self.process.lock() {
            Ok(mut guard) => *guard = process,
            Err(poisoned) => *poisoned.into_inner() = process,
        }
    }
}

/// 状态机步骤
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    /// 等待站点配置加载
    Initialise,
    /// 发送连接命令
    SendConnect,
    /// 等待隧道建立
    AwaitTunnel,
    /// 监控隧道
    Monitor,
    /// 等待后重新连接
    Retry,
    /// 断开
    Disconnect,
}

/// 隧道会话
pub struct TunnelSession {
    control: Arc<SessionControl>,
    config: SessionConfig,
    launcher: Arc<dyn ClientLauncher>,
    prober: Arc<dyn Prober>,
    notifier: Arc<StatusNotifier>,
    state: TunnelState,
    process: Option<ProcessHandle>,
    scanner: Option<OutputScanner>,
    pinger: Option<PingerHandle>,
}

impl TunnelSession {
    pub fn new(
        profile: impl Into<String>,
        config: SessionConfig,
        launcher: Arc<dyn ClientLauncher>,
        prober: Arc<dyn Prober>,
        notifier: Arc<StatusNotifier>,
    ) -> Self {
        let control = Arc::new(SessionControl {
            id: uuid::Uuid::new_v4().to_string(),
            profile: profile.into(),
            stop: CancellationToken::new(),
            process: Mutex::new(None),
        });
        Self {
            control,
            config,
            launcher,
            prober,
            notifier,
            state: TunnelState::IDLE,
            process: None,
            scanner: None,
            pinger: None,
        }
    }

    /// 共享控制句柄（用于从其他任务请求断开）
    pub fn control(&self) -> Arc<SessionControl> {
        self.control.clone()
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// 运行状态机直到会话结束，结束时状态回到 IDLE
    pub async fn run(mut self) {
        info!(
            "[Tunnel] [{}] Session {} starting",
            self.control.profile,
            self.control.id
        );
        self.transition(TunnelState::STARTED);

        let mut step = match self.execute_binary().await {
            Ok(()) => Step::Initialise,
            Err(e) => {
                self.fail(e);
                Step::Disconnect
            }
        };

        while step != Step::Disconnect {
            debug!("[Tunnel] [{}] Step {:?}", self.control.profile, step);
            step = match step {
                Step::Initialise => self.step_initialise().await,
                Step::SendConnect => self.step_send_connect().await,
                Step::AwaitTunnel => self.step_await_tunnel().await,
                Step::Monitor => self.step_monitor().await,
                Step::Retry => self.step_retry().await,
                Step::Disconnect => Step::Disconnect,
            };
        }

        self.disconnect().await;
        info!(
            "[Tunnel] [{}] Session {} finished",
            self.control.profile,
            self.control.id
        );
    }

    /// 拉起 ikec 并接管其输入输出
    async fn execute_binary(&mut self) -> Result<(), TunnelError> {
        if self.control.is_stop_requested() {
            return Err(TunnelError::ProcessGone);
        }

        let client = self.launcher.spawn(&self.control.profile).await?;
        let (process, output) = ProcessHandle::new(client);
        self.scanner = Some(OutputScanner::new(output, process.closed_token()));
        self.control.set_process(Some(process.clone()));
        self.process = Some(process.clone());

        // 在登记进程之后检查：若断开请求先到，请求方看不到进程，由这里负责终止
        if self.control.is_stop_requested() {
            process.terminate().await;
            return Err(TunnelError::ProcessGone);
        }

        self.transition(TunnelState::STARTED | TunnelState::CONNECTING);
        Ok(())
    }

    /// 等待站点配置加载，超时或加载失败都是致命错误
    async fn step_initialise(&mut self) -> Step {
        let timeout = self.config.scan_timeout;
        match self
            .scan(&[&*CONFIG_LOADED, &*FAILED_TO_LOAD], timeout)
            .await
        {
            ScanOutcome::Matched(0) => {
                info!("[Tunnel] [{}] Config loaded", self.control.profile);
                Step::SendConnect
            }
            ScanOutcome::Matched(_) => {
                let message = format!(
                    "Fail to load site configuration for {}",
                    self.control.profile
                );
                self.fail(TunnelError::ProtocolFailure(message));
                Step::Disconnect
            }
            ScanOutcome::Timeout => {
                self.fail(TunnelError::Timeout {
                    stage: "site configuration",
                    elapsed: timeout,
                });
                Step::Disconnect
            }
            ScanOutcome::Closed => {
                self.fail(TunnelError::ProcessFault(
                    "ikec exited before loading the site configuration".into(),
                ));
                Step::Disconnect
            }
        }
    }

    /// 发送连接命令
    async fn step_send_connect(&mut self) -> Step {
        info!(
            "[Tunnel] [{}] Sending connect command",
            self.control.profile
        );
        let Some(process) = self.process.clone() else {
            return Step::Disconnect;
        };
        match process.send_line(commands::CONNECT).await {
            Ok(()) => Step::AwaitTunnel,
            Err(e) => {
                self.fail(TunnelError::ProcessFault(format!(
                    "Failed to send connect command: {}",
                    e
                )));
                Step::Disconnect
            }
        }
    }

    /// 等待隧道建立
    ///
    /// 超时只记录日志并继续等待，不重发连接命令：ikec 可能仍在协商中。
    async fn step_await_tunnel(&mut self) -> Step {
        match self
            .scan(&[&*TUNNEL_ENABLED, &*DETACHED], self.config.scan_timeout)
            .await
        {
            ScanOutcome::Matched(0) => {
                info!("[Tunnel] [{}] Tunnel established", self.control.profile);
                self.enter_monitoring();
                Step::Monitor
            }
            ScanOutcome::Matched(_) => {
                info!(
                    "[Tunnel] [{}] Detached from key daemon",
                    self.control.profile
                );
                Step::Retry
            }
            ScanOutcome::Timeout => {
                error!(
                    "[Tunnel] [{}] Cannot establish tunnel. Retrying",
                    self.control.profile
                );
                Step::AwaitTunnel
            }
            ScanOutcome::Closed => {
                self.fail(TunnelError::ProcessFault(
                    "ikec exited while establishing the tunnel".into(),
                ));
                Step::Disconnect
            }
        }
    }

    fn enter_monitoring(&mut self) {
        info!(
            "[Tunnel] [{}] Monitoring changes of the tunnel",
            self.control.profile
        );
        self.transition(TunnelState::STARTED | TunnelState::CONNECTED);

        if self.pinger.is_none() {
            if let Some(ping) = &self.config.ping {
                self.pinger = Some(PingerHandle::start(
                    ping.host.clone(),
                    ping.interval,
                    self.prober.clone(),
                    self.notifier.subscribe(),
                ));
            }
        }
    }

    /// 监控循环中的一次轮询，超时是正常的稳态
    async fn step_monitor(&mut self) -> Step {
        match self.scan(&[&*DETACHED], self.config.monitor_poll).await {
            ScanOutcome::Timeout => Step::Monitor,
            ScanOutcome::Matched(_) => {
                self.stop_pinger().await;
                self.transition(TunnelState::STARTED | TunnelState::CONNECTING);
                info!(
                    "[Tunnel] [{}] Tunnel has been closed. Retrying to establish the connection",
                    self.control.profile
                );
                Step::Retry
            }
            ScanOutcome::Closed => {
                self.fail(TunnelError::ProcessFault(
                    "Quitting monitoring loop: ikec output closed".into(),
                ));
                Step::Disconnect
            }
        }
    }

    /// 固定等待后重新发送连接命令，等待期间可被断开请求打断
    async fn step_retry(&mut self) -> Step {
        debug!(
            "[Tunnel] [{}] Waiting {}s",
            self.control.profile,
            self.config.retry_sleep.as_secs()
        );
        tokio::select! {
            biased;
            _ = self.control.stop.cancelled() => Step::Disconnect,
            _ = tokio::time::sleep(self.config.retry_sleep) => Step::SendConnect,
        }
    }

    async fn scan(
        &mut self,
        patterns: &[&regex::Regex],
        timeout: std::time::Duration,
    ) -> ScanOutcome {
        match self.scanner.as_mut() {
            Some(scanner) => scanner.expect(patterns, timeout).await,
            None => ScanOutcome::Closed,
        }
    }

    async fn stop_pinger(&mut self) {
        if let Some(pinger) = self.pinger.take() {
            pinger.stop().await;
        }
    }

    /// 断开：STOPPING -> 取消探测 -> 终止进程 -> IDLE
    async fn disconnect(&mut self) {
        if self.state.is_idle() {
            return;
        }
        self.transition(Phase::Stopping.state());
        self.stop_pinger().await;
        if let Some(process) = self.process.take() {
            process.terminate().await;
        }
        self.control.set_process(None);
        self.scanner = None;
        self.transition(TunnelState::IDLE);
    }

    /// 报告致命错误；已请求断开时属于预期情况，不再上报
    fn fail(&self, error: TunnelError) {
        if self.control.is_stop_requested() {
            debug!(
                "[Tunnel] [{}] Ignoring error during shutdown: {}",
                self.control.profile,
                error
            );
            return;
        }
        error!("[Tunnel] [{}] {}", self.control.profile, error);
        self.notifier.fatal(&error);
    }

    /// 校验并发布状态迁移
    fn transition(&mut self, next: TunnelState) {
        if !is_valid_transition(self.state, next) {
            warn!(
                "[Tunnel] [{}] Rejected state transition {} -> {}",
                self.control.profile,
                self.state,
                next
            );
            return;
        }
        self.state = next;
        self.notifier.notify(next);
    }
}
