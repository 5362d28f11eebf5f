use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::instance::Instance;

/// Fetch 返回的视图：zone -> 实例列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instances: HashMap<String, Vec<Instance>>,
    pub latest_timestamp: i64,
    pub scheduler: Option<SchedulerInfo>,
}

impl InstanceInfo {
    pub fn len(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zone_len(&self, zone: &str) -> usize {
        self.instances.get(zone).map(Vec::len).unwrap_or(0)
    }
}

// 调度元数据：zone -> 客户端数量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerInfo {
    pub clients: HashMap<String, u64>,
}
