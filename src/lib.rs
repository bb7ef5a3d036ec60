// ShrewGuard - ShrewSoft VPN 隧道守护
//
// 驱动 ikec 建立隧道，检测断线并自动重连。

pub mod constants;
pub mod logging;
pub mod models;
pub mod services;
pub mod tunnel;
