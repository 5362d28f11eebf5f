use std::collections::HashMap;

use super::instance::InstanceStatus;

// 注册参数
#[derive(Debug, Clone, Default)]
pub struct ArgRegister {
    pub region: String,
    pub zone: String,
    pub env: String,
    pub app_id: String,
    pub hostname: String,
    pub addrs: Vec<String>,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub status: InstanceStatus,
    pub latest_timestamp: i64,
    pub dirty_timestamp: i64,
}

// 续约参数
#[derive(Debug, Clone, Default)]
pub struct ArgRenew {
    pub zone: String,
    pub env: String,
    pub app_id: String,
    pub hostname: String,
}

// 注销参数
#[derive(Debug, Clone, Default)]
pub struct ArgCancel {
    pub zone: String,
    pub env: String,
    pub app_id: String,
    pub hostname: String,
    pub latest_timestamp: i64,
}

/// 批量修改实例状态/元数据
///
/// `status` 和 `metadata` 可以为空；非空时长度必须与 `hostnames` 一致，
/// 按下标一一对应。
#[derive(Debug, Clone, Default)]
pub struct ArgSet {
    pub zone: String,
    pub env: String,
    pub app_id: String,
    pub hostnames: Vec<String>,
    pub status: Vec<InstanceStatus>,
    pub metadata: Vec<HashMap<String, String>>,
    pub set_timestamp: i64,
}

// 长轮询参数，app_ids 与 latest_timestamps 按下标对应
#[derive(Debug, Clone, Default)]
pub struct ArgPolls {
    pub env: String,
    pub app_ids: Vec<String>,
    pub latest_timestamps: Vec<i64>,
    pub zone: String,
    pub hostname: String,
}
