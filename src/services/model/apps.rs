use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use super::app::App;
use super::info::InstanceInfo;
use super::instance::{Instance, StatusFilter};
use super::bump_latest;
use crate::services::registry::RegistryError;

/// 某个服务在某个环境下所有可用区的实例集合（zone -> App）
#[derive(Debug, Default)]
pub struct Apps {
    apps: DashMap<String, Arc<App>>,
    latest_timestamp: AtomicI64,
}

impl Apps {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在对应可用区插入或更新实例
    ///
    /// 插入期间持有 zone 所在分片的写锁，并发的 [`Apps::del`] 不会删掉
    /// 刚写入实例的 App。
    pub fn register(&self, ins: Instance, latest_time: i64) -> (Instance, bool) {
        let result = {
            let app = self
                .apps
                .entry(ins.zone.clone())
                .or_insert_with(|| Arc::new(App::new(&ins.zone, &ins.app_id)));
            app.new_instance(ins, latest_time)
        };
        self.update_latest(latest_time);
        result
    }

    /// zone 为空时返回全部可用区
    pub fn app(&self, zone: &str) -> Vec<Arc<App>> {
        if zone.is_empty() {
            self.apps.iter().map(|entry| entry.value().clone()).collect()
        } else {
            self.apps
                .get(zone)
                .map(|entry| vec![entry.value().clone()])
                .unwrap_or_default()
        }
    }

    // 仅在 App 为空时删除
    pub fn del(&self, zone: &str) {
        self.apps.remove_if(zone, |_, app| app.is_empty());
    }

    pub fn update_latest(&self, latest_time: i64) -> i64 {
        bump_latest(&self.latest_timestamp, latest_time)
    }

    pub fn latest_timestamp(&self) -> i64 {
        self.latest_timestamp.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.apps.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.iter().all(|entry| entry.value().is_empty())
    }

    /// 计算视图
    ///
    /// `since` 不早于当前最新时间戳时返回 `NotModified`；指定的可用区不存在时
    /// 返回 `NotFound`，`key` 为可用区名。
    pub fn instance_info(
        &self,
        zone: &str,
        since: i64,
        status: StatusFilter,
    ) -> Result<InstanceInfo, RegistryError> {
        let latest_timestamp = self.latest_timestamp();
        if since >= latest_timestamp {
            return Err(RegistryError::NotModified { latest_timestamp });
        }
        if !zone.is_empty() && !self.apps.contains_key(zone) {
            return Err(RegistryError::NotFound {
                key: zone.to_string(),
            });
        }
        let mut instances: HashMap<String, Vec<Instance>> = HashMap::new();
        for app in self.app(zone) {
            let matched: Vec<Instance> = app
                .instances()
                .into_iter()
                .filter(|ins| status.matches(ins.status))
                .collect();
            if !matched.is_empty() {
                instances.entry(app.zone.clone()).or_default().extend(matched);
            }
        }
        Ok(InstanceInfo {
            instances,
            latest_timestamp,
            scheduler: None,
        })
    }
}
