// 隧道会话状态
//
// 状态以位掩码形式对外发布（与 UI 的图标/菜单映射保持兼容），
// 内部通过 Phase 枚举和迁移表校验每一次状态变化。

use std::fmt;
use std::ops::BitOr;

/// 会话状态位掩码
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TunnelState(u8);

impl TunnelState {
    /// 空闲（未连接）
    pub const IDLE: Self = Self(0);
    /// 会话已启动
    pub const STARTED: Self = Self(0b0001);
    /// 隧道已建立
    pub const CONNECTED: Self = Self(0b0010);
    /// 正在建立隧道
    pub const CONNECTING: Self = Self(0b0100);
    /// 正在断开，本会话实例的终态
    pub const STOPPING: Self = Self(0b1000);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// 当前状态对应的阶段，非法组合返回 None
    pub fn phase(self) -> Option<Phase> {
        const STARTED: u8 = TunnelState::STARTED.0;
        const CONNECTED: u8 = TunnelState::CONNECTED.0;
        const CONNECTING: u8 = TunnelState::CONNECTING.0;
        const STOPPING: u8 = TunnelState::STOPPING.0;

        match self.0 {
            0 => Some(Phase::Idle),
            b if b & STOPPING != 0 => Some(Phase::Stopping),
            STARTED => Some(Phase::Starting),
            b if b == STARTED | CONNECTING => Some(Phase::Connecting),
            b if b == STARTED | CONNECTED => Some(Phase::Connected),
            _ => None,
        }
    }
}

impl BitOr for TunnelState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_idle() {
            return f.write_str("IDLE");
        }
        let names = [
            (Self::STARTED, "STARTED"),
            (Self::CONNECTED, "CONNECTED"),
            (Self::CONNECTING, "CONNECTING"),
            (Self::STOPPING, "STOPPING"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// 空闲
    Idle,
    /// 已启动，尚未拉起 ikec
    Starting,
    /// 加载配置 / 等待隧道建立 / 断线重试
    Connecting,
    /// 隧道已建立，处于监控循环
    Connected,
    /// 正在断开
    Stopping,
}

impl Phase {
    /// 迁移表
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Connecting)
                | (Starting, Stopping)
                | (Connecting, Connecting)
                | (Connecting, Connected)
                | (Connecting, Stopping)
                | (Connected, Connecting)
                | (Connected, Stopping)
                | (Stopping, Idle)
        )
    }

    /// 阶段对应的标准状态位
    pub fn state(self) -> TunnelState {
        match self {
            Phase::Idle => TunnelState::IDLE,
            Phase::Starting => TunnelState::STARTED,
            Phase::Connecting => TunnelState::STARTED | TunnelState::CONNECTING,
            Phase::Connected => TunnelState::STARTED | TunnelState::CONNECTED,
            Phase::Stopping => TunnelState::STOPPING,
        }
    }
}

/// 校验一次状态迁移是否合法
pub fn is_valid_transition(from: TunnelState, to: TunnelState) -> bool {
    match (from.phase(), to.phase()) {
        (Some(a), Some(b)) => a.can_transition_to(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PHASES: [Phase; 5] = [
        Phase::Idle,
        Phase::Starting,
        Phase::Connecting,
        Phase::Connected,
        Phase::Stopping,
    ];

    #[test]
    fn test_phase_roundtrip() {
        for phase in ALL_PHASES {
            assert_eq!(phase.state().phase(), Some(phase));
        }
    }

    #[test]
    fn test_connected_and_connecting_are_exclusive() {
        let both = TunnelState::STARTED | TunnelState::CONNECTED | TunnelState::CONNECTING;
        assert_eq!(both.phase(), None);
        assert_eq!(TunnelState::CONNECTED.phase(), None);
    }

    #[test]
    fn test_stopping_only_returns_to_idle() {
        for phase in ALL_PHASES {
            let allowed = Phase::Stopping.can_transition_to(phase);
            assert_eq!(allowed, phase == Phase::Idle, "Stopping -> {:?}", phase);
        }
        // STOPPING 与其他位组合仍视为 Stopping
        let stopping = TunnelState::STOPPING | TunnelState::STARTED;
        assert!(!is_valid_transition(
            stopping,
            TunnelState::STARTED | TunnelState::CONNECTED
        ));
        assert!(is_valid_transition(stopping, TunnelState::IDLE));
    }

    #[test]
    fn test_reconnect_cycle_keeps_started() {
        let connected = Phase::Connected.state();
        let connecting = Phase::Connecting.state();
        assert!(is_valid_transition(connected, connecting));
        assert!(is_valid_transition(connecting, connecting));
        assert!(is_valid_transition(connecting, connected));
        assert!(connected.contains(TunnelState::STARTED));
        assert!(connecting.contains(TunnelState::STARTED));
    }

    #[test]
    fn test_idle_only_starts() {
        assert!(is_valid_transition(TunnelState::IDLE, TunnelState::STARTED));
        assert!(!is_valid_transition(
            TunnelState::IDLE,
            Phase::Connected.state()
        ));
        assert!(!is_valid_transition(TunnelState::IDLE, TunnelState::STOPPING));
    }

    #[test]
    fn test_display() {
        assert_eq!(TunnelState::IDLE.to_string(), "IDLE");
        assert_eq!(
            (TunnelState::STARTED | TunnelState::CONNECTING).to_string(),
            "STARTED|CONNECTING"
        );
    }
}
