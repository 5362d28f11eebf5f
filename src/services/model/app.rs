use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::args::ArgSet;
use super::instance::Instance;
use super::bump_latest;

/// 单个可用区内某个服务的全部实例（hostname -> Instance）
#[derive(Debug)]
pub struct App {
    pub app_id: String,
    pub zone: String,
    instances: DashMap<String, Instance>,
    latest_timestamp: AtomicI64,
}

impl App {
    pub fn new(zone: &str, app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            zone: zone.to_string(),
            instances: DashMap::new(),
            latest_timestamp: AtomicI64::new(0),
        }
    }

    /// 插入或更新实例，返回存储后的实例以及是否为新实例
    pub fn new_instance(&self, mut ni: Instance, latest_time: i64) -> (Instance, bool) {
        let is_new = match self.instances.entry(ni.hostname.clone()) {
            Entry::Occupied(mut entry) => {
                let oi = entry.get();
                ni.reg_timestamp = oi.reg_timestamp;
                ni.up_timestamp = oi.up_timestamp;
                // 复制过来的旧写入不能覆盖较新的数据
                if ni.dirty_timestamp < oi.dirty_timestamp {
                    tracing::warn!(
                        app_id = %self.app_id,
                        hostname = %ni.hostname,
                        incoming_dirty = ni.dirty_timestamp,
                        stored_dirty = oi.dirty_timestamp,
                        "Register carries stale dirty timestamp, keeping stored instance"
                    );
                    ni = oi.clone();
                }
                entry.insert(ni.clone());
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(ni.clone());
                true
            }
        };
        bump_latest(&self.latest_timestamp, latest_time);
        (ni, is_new)
    }

    pub fn renew(&self, hostname: &str, now: i64) -> Option<Instance> {
        let mut ins = self.instances.get_mut(hostname)?;
        ins.renew_timestamp = now;
        Some(ins.clone())
    }

    /// 删除实例，返回被删除的实例以及剩余实例数
    pub fn cancel(&self, hostname: &str, latest_time: i64) -> Option<(Instance, usize)> {
        let (_, mut ins) = self.instances.remove(hostname)?;
        ins.latest_timestamp = latest_time;
        bump_latest(&self.latest_timestamp, latest_time);
        Some((ins, self.instances.len()))
    }

    pub fn set(&self, arg: &ArgSet) -> bool {
        if arg.hostnames.is_empty() {
            return false;
        }
        if (!arg.status.is_empty() && arg.status.len() != arg.hostnames.len())
            || (!arg.metadata.is_empty() && arg.metadata.len() != arg.hostnames.len())
        {
            tracing::warn!(
                app_id = %self.app_id,
                hostnames = arg.hostnames.len(),
                status = arg.status.len(),
                metadata = arg.metadata.len(),
                "Set arguments length mismatch"
            );
            return false;
        }
        // 先确认全部 hostname 都存在，避免只修改一部分
        if let Some(missing) = arg
            .hostnames
            .iter()
            .find(|hostname| !self.instances.contains_key(hostname.as_str()))
        {
            tracing::warn!(
                app_id = %self.app_id,
                zone = %self.zone,
                hostname = %missing,
                "Set target instance not found"
            );
            return false;
        }

        for (idx, hostname) in arg.hostnames.iter().enumerate() {
            if let Some(mut ins) = self.instances.get_mut(hostname) {
                if let Some(status) = arg.status.get(idx) {
                    ins.status = *status;
                }
                if let Some(metadata) = arg.metadata.get(idx) {
                    ins.metadata = metadata.clone();
                }
                ins.dirty_timestamp = arg.set_timestamp;
                ins.latest_timestamp = arg.set_timestamp;
            }
        }
        bump_latest(&self.latest_timestamp, arg.set_timestamp);
        true
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn latest_timestamp(&self) -> i64 {
        self.latest_timestamp.load(Ordering::Acquire)
    }
}
