// 状态通知
//
// 状态机每次迁移都会先同步通知所有观察者，然后才继续执行。
// 同时通过 watch 通道发布最新快照，供 pinger 等后台任务读取。

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::debug;

use super::error::TunnelError;
use super::state::TunnelState;

/// 状态观察者（UI 层实现）
pub trait StateObserver: Send + Sync {
    /// 状态变化
    fn on_state_changed(&self, state: TunnelState);

    /// 致命错误，每个错误只通知一次（UI 弹窗）
    fn on_fatal(&self, _error: &TunnelError) {}
}

/// 状态通知器
pub struct StatusNotifier {
    observers: RwLock<Vec<Arc<dyn StateObserver>>>,
    snapshot: watch::Sender<TunnelState>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(TunnelState::IDLE);
        Self {
            observers: RwLock::new(Vec::new()),
            snapshot,
        }
    }

    /// 注册观察者
    pub fn register(&self, observer: Arc<dyn StateObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// 当前状态快照
    pub fn current(&self) -> TunnelState {
        *self.snapshot.borrow()
    }

    /// 订阅状态快照
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.snapshot.subscribe()
    }

    /// 发布新状态
    ///
    /// 先更新快照再逐个回调观察者。回调时不持有锁，观察者可以在回调里注册新的观察者。
    pub fn notify(&self, state: TunnelState) {
        self.snapshot.send_replace(state);
        debug!("[Notifier] State changed to {}", state);
        for observer in self.snapshot_observers() {
            observer.on_state_changed(state);
        }
    }

    /// 发布致命错误
    pub fn fatal(&self, error: &TunnelError) {
        for observer in self.snapshot_observers() {
            observer.on_fatal(error);
        }
    }

    fn snapshot_observers(&self) -> Vec<Arc<dyn StateObserver>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
