use dashmap::DashMap;

use super::service::apps_key;
use crate::config::SchedulerEntry;
use crate::services::model::SchedulerInfo;

/// 调度元数据来源，Fetch 时按 (app_id, env) 查询，返回 `None` 表示没有
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    fn get(&self, app_id: &str, env: &str) -> Option<SchedulerInfo>;
}

// 基于配置的静态调度信息
#[derive(Debug, Default)]
pub struct StaticScheduler {
    entries: DashMap<String, SchedulerInfo>,
}

impl StaticScheduler {
    pub fn from_config(entries: &[SchedulerEntry]) -> Self {
        let scheduler = Self::default();
        scheduler.load(entries);
        scheduler
    }

    /// 整体替换现有条目
    pub fn load(&self, entries: &[SchedulerEntry]) {
        self.entries.clear();
        for entry in entries {
            self.insert(
                &entry.app_id,
                &entry.env,
                SchedulerInfo {
                    clients: entry.clients.clone(),
                },
            );
        }
        tracing::info!(entries = self.entries.len(), "Loaded scheduler entries");
    }

    pub fn insert(&self, app_id: &str, env: &str, info: SchedulerInfo) {
        self.entries.insert(apps_key(app_id, env), info);
    }
}

impl Scheduler for StaticScheduler {
    fn get(&self, app_id: &str, env: &str) -> Option<SchedulerInfo> {
        self.entries
            .get(&apps_key(app_id, env))
            .map(|entry| entry.value().clone())
    }
}
