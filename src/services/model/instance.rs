use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::args::ArgRegister;
use super::now_nanos;

/// 实例状态，按位取值以便用 [`StatusFilter`] 组合过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Up,
    Waiting,
}

impl InstanceStatus {
    pub fn bit(self) -> u32 {
        match self {
            InstanceStatus::Up => 1,
            InstanceStatus::Waiting => 2,
        }
    }
}

/// Fetch 时的状态过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Up,
    Waiting,
    All,
}

impl StatusFilter {
    fn mask(self) -> u32 {
        match self {
            StatusFilter::Up => InstanceStatus::Up.bit(),
            StatusFilter::Waiting => InstanceStatus::Waiting.bit(),
            StatusFilter::All => InstanceStatus::Up.bit() | InstanceStatus::Waiting.bit(),
        }
    }

    pub fn matches(self, status: InstanceStatus) -> bool {
        self.mask() & status.bit() > 0
    }
}

// 一个注册的服务端点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub region: String,
    pub zone: String,
    pub env: String,
    pub app_id: String,
    pub hostname: String,
    pub addrs: Vec<String>,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub status: InstanceStatus,
    // 以下时间戳均为 Unix 纳秒
    pub reg_timestamp: i64,
    pub up_timestamp: i64,
    pub renew_timestamp: i64,
    pub dirty_timestamp: i64,
    pub latest_timestamp: i64,
}

impl Instance {
    pub fn new(arg: ArgRegister) -> Self {
        let now = now_nanos();
        let latest_timestamp = if arg.latest_timestamp > 0 {
            arg.latest_timestamp
        } else {
            now
        };
        let dirty_timestamp = if arg.dirty_timestamp > 0 {
            arg.dirty_timestamp
        } else {
            now
        };
        Self {
            region: arg.region,
            zone: arg.zone,
            env: arg.env,
            app_id: arg.app_id,
            hostname: arg.hostname,
            addrs: arg.addrs,
            version: arg.version,
            metadata: arg.metadata,
            status: arg.status,
            reg_timestamp: now,
            up_timestamp: now,
            renew_timestamp: now,
            dirty_timestamp,
            latest_timestamp,
        }
    }

    /// 空闲时长（纳秒），时钟回拨时视为 0
    pub fn idle_nanos(&self, now: i64) -> i64 {
        (now - self.renew_timestamp).max(0)
    }
}
