use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::logging::LogHandle;
use crate::models::AppSettings;
use crate::services::storage::SettingsStore;

use super::config::SessionConfig;
use super::error::TunnelError;
use super::notifier::{StateObserver, StatusNotifier};
use super::pinger::{Prober, SystemPing};
use super::process::{ClientLauncher, IkecLauncher};
use super::session::{SessionControl, TunnelSession};
use super::state::TunnelState;

/// 正在运行的会话
struct ActiveSession {
    control: Arc<SessionControl>,
    task: JoinHandle<()>,
    done: CancellationToken,
}

impl ActiveSession {
    /// 请求断开并等待状态机任务结束
    async fn shutdown(self) {
        self.control.request_stop().await;
        if let Err(e) = self.task.await {
            error!(
                "[Tunnel Manager] Session {} task failed: {}",
                self.control.id(),
                e
            );
        }
    }
}

/// 隧道管理器
/// 持有配置与至多一个活跃会话，UI 层通过它发起连接 / 断开
pub struct TunnelManager {
    settings: RwLock<AppSettings>,
    store: Option<SettingsStore>,
    log: Option<LogHandle>,
    launcher: Arc<dyn ClientLauncher>,
    prober: Arc<dyn Prober>,
    notifier: Arc<StatusNotifier>,
    active: Mutex<Option<ActiveSession>>,
}

impl TunnelManager {
    pub fn new(
        settings: AppSettings,
        launcher: Arc<dyn ClientLauncher>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            store: None,
            log: None,
            launcher,
            prober,
            notifier: Arc::new(StatusNotifier::new()),
            active: Mutex::new(None),
        }
    }

    /// 使用真实的 ikec 与系统 ping
    pub fn from_settings(settings: AppSettings) -> Self {
        let launcher = Arc::new(IkecLauncher::new(settings.ike.ikec()));
        Self::new(settings, launcher, Arc::new(SystemPing))
    }

    /// 设置变化时写回的存储
    pub fn with_store(mut self, store: SettingsStore) -> Self {
        self.store = Some(store);
        self
    }

    /// 详细日志开关对应的日志句柄
    pub fn with_log_handle(mut self, log: LogHandle) -> Self {
        self.log = Some(log);
        self
    }

    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) {
        self.notifier.register(observer);
    }

    pub fn notifier(&self) -> Arc<StatusNotifier> {
        self.notifier.clone()
    }

    /// 当前状态
    pub fn state(&self) -> TunnelState {
        self.notifier.current()
    }

    pub fn settings(&self) -> AppSettings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 连接当前选中的配置
    pub async fn connect(&self) -> Result<String, TunnelError> {
        let profile = self
            .settings()
            .ui
            .selected_profile()
            .map(str::to_string)
            .ok_or_else(|| TunnelError::InvalidProfile(String::new()))?;
        self.connect_profile(&profile).await
    }

    /// 连接指定配置，返回会话 ID
    ///
    /// 已有会话时先完整断开并等待其结束，再启动新会话。
    pub async fn connect_profile(&self, profile: &str) -> Result<String, TunnelError> {
        if profile.trim().is_empty() {
            return Err(TunnelError::InvalidProfile(profile.to_string()));
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                "[Tunnel Manager] Disconnecting {} before connecting {}",
                previous.control.profile(),
                profile
            );
            previous.shutdown().await;
        }

        let config = SessionConfig::from_settings(&self.settings());
        let session = TunnelSession::new(
            profile,
            config,
            self.launcher.clone(),
            self.prober.clone(),
            self.notifier.clone(),
        );
        let control = session.control();
        let id = control.id().to_string();
        let done = CancellationToken::new();
        let finished = done.clone();

        let task = tokio::spawn(async move {
            session.run().await;
            finished.cancel();
        });

        info!("[Tunnel Manager] Session {} started for {}", id, profile);
        *active = Some(ActiveSession {
            control,
            task,
            done,
        });
        Ok(id)
    }

    /// 断开当前会话，没有会话时为空操作
    pub async fn disconnect(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            info!(
                "[Tunnel Manager] Disconnecting {}",
                previous.control.profile()
            );
            previous.shutdown().await;
        }
    }

    /// 等待当前会话自行结束（或被断开），没有会话时立即返回
    pub async fn wait_finished(&self) {
        let done = self.active.lock().await.as_ref().map(|a| a.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// 选择配置并写回设置
    pub fn select_profile(&self, profile: &str) {
        self.update_settings(|settings| settings.ui.profile = Some(profile.to_string()));
    }

    /// 切换详细日志并写回设置
    pub fn set_verbose_logging(&self, verbose: bool) {
        if let Some(log) = &self.log {
            if let Err(e) = log.set_verbose(verbose) {
                warn!("[Tunnel Manager] {:#}", e);
            }
        }
        self.update_settings(|settings| settings.ui.verbose_logging = verbose);
    }

    fn update_settings(&self, update: impl FnOnce(&mut AppSettings)) {
        let snapshot = {
            let mut settings = match self.settings.write() {
                Ok(settings) => settings,
                Err(poisoned) => poisoned.into_inner(),
            };
            update(&mut settings);
            settings.clone()
        };
        self.write_config(&snapshot);
    }

    fn write_config(&self, settings: &AppSettings) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(settings) {
                error!("[Tunnel Manager] Failed to write settings: {:#}", e);
            }
        }
    }
}
