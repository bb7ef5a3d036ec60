// 外部协作服务：设置持久化、站点配置发现、iked 守护进程

pub mod daemon;
pub mod profiles;
pub mod storage;
