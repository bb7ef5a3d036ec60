// 隧道会话模块
//
// 模块结构:
// - error: 错误类型 (TunnelError)
// - state: 状态位掩码与迁移表 (TunnelState, Phase)
// - config: 会话配置 (SessionConfig, PingConfig)
// - notifier: 状态通知 (StatusNotifier, StateObserver)
// - process: ikec 进程管理 (ClientLauncher, IkecLauncher, ProcessHandle)
// - scanner: 输出扫描 (OutputScanner, ScanOutcome)
// - pinger: 存活探测 (PingerHandle, Prober)
// - session: 会话状态机 (TunnelSession)
// - manager: 会话管理器 (TunnelManager)

pub mod config;
pub mod error;
pub mod manager;
pub mod notifier;
pub mod pinger;
pub mod process;
pub mod scanner;
pub mod session;
pub mod state;

// 公开导出
pub use config::{PingConfig, SessionConfig};
pub use error::TunnelError;
pub use manager::TunnelManager;
pub use notifier::{StateObserver, StatusNotifier};
pub use pinger::{PingerHandle, Prober, SystemPing};
pub use process::{ClientLauncher, IkecLauncher, ProcessHandle, SpawnedClient};
pub use scanner::{OutputScanner, ScanOutcome};
pub use session::{SessionControl, TunnelSession};
pub use state::{Phase, TunnelState};
