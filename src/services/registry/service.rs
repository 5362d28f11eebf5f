use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use super::error::RegistryError;
use super::guard::Guard;
use super::scheduler::Scheduler;
use super::types::{PollConn, RegistryConfig};
use crate::services::model::{
    ArgCancel, ArgRenew, ArgSet, Apps, Instance, InstanceInfo, StatusFilter, now_nanos,
};

// 注册表：app_id-env -> Apps
#[derive(Debug)]
pub struct Registry {
    pub(super) appm: DashMap<String, Arc<Apps>>,
    // env.app_id -> hostname -> 等待中的连接
    pub(super) conns: DashMap<String, HashMap<String, PollConn>>,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) guard: Guard,
    pub(super) config: RegistryConfig,
    pub(super) task_tracker: TaskTracker,
}

pub(crate) fn apps_key(app_id: &str, env: &str) -> String {
    format!("{app_id}-{env}")
}

impl Registry {
    /// 创建注册表；需要周期性剔除时再调用 [`Registry::start`]
    pub fn new(config: RegistryConfig, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        tracing::info!(
            renew_percent_threshold = config.renew_percent_threshold,
            evict_percent_threshold = config.evict_percent_threshold,
            evict_threshold_secs = config.evict_threshold.as_secs(),
            evict_ceiling_secs = config.evict_ceiling.as_secs(),
            "Creating registry"
        );
        Arc::new(Self {
            appm: DashMap::new(),
            conns: DashMap::new(),
            scheduler,
            guard: Guard::new(config.renews_per_instance, config.renew_percent_threshold),
            config,
            task_tracker: TaskTracker::new(),
        })
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn apps(&self, app_id: &str, env: &str) -> Option<Arc<Apps>> {
        self.appm
            .get(&apps_key(app_id, env))
            .map(|entry| entry.value().clone())
    }

    pub(super) fn all_apps(&self) -> Vec<Arc<Apps>> {
        self.appm.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 注册实例，续约时间戳取注册时间
    ///
    /// 数据写入完成后才广播，被唤醒的长轮询一定能取到新数据。
    pub async fn register(&self, mut ins: Instance, latest_time: i64) -> Instance {
        let latest_time = if latest_time > 0 { latest_time } else { now_nanos() };
        ins.renew_timestamp = latest_time;
        let env = ins.env.clone();
        let app_id = ins.app_id.clone();

        // 持有顶层分片锁写入，避免与 cancel 的空 Apps 回收交错
        let (stored, is_new) = {
            let apps = self
                .appm
                .entry(apps_key(&app_id, &env))
                .or_insert_with(|| Arc::new(Apps::new()));
            apps.register(ins, latest_time)
        };
        if is_new {
            self.guard.incr_exp();
        }

        tracing::info!(
            app_id = %app_id,
            env = %env,
            zone = %stored.zone,
            hostname = %stored.hostname,
            is_new,
            "Registered instance"
        );

        self.broadcast(&env, &app_id).await;
        stored
    }

    /// 续约
    ///
    /// 服务或可用区不存在时返回 `NotFound`；hostname 不存在返回 `Ok(None)`。
    pub fn renew(&self, arg: &ArgRenew) -> Result<Option<Instance>, RegistryError> {
        let apps = self
            .apps(&arg.app_id, &arg.env)
            .map(|apps| apps.app(&arg.zone))
            .unwrap_or_default();
        if apps.is_empty() {
            return Err(RegistryError::NotFound {
                key: format!("{}/{}", apps_key(&arg.app_id, &arg.env), arg.zone),
            });
        }
        let now = now_nanos();
        let Some(ins) = apps.iter().find_map(|app| app.renew(&arg.hostname, now)) else {
            tracing::debug!(
                app_id = %arg.app_id,
                env = %arg.env,
                hostname = %arg.hostname,
                "Renew for unknown hostname"
            );
            return Ok(None);
        };
        self.guard.incr_fac();
        Ok(Some(ins))
    }

    pub async fn cancel(&self, arg: &ArgCancel) -> Option<Instance> {
        let ins = self
            .cancel_instance(&arg.zone, &arg.env, &arg.app_id, &arg.hostname, arg.latest_timestamp)
            .await?;
        self.guard.decr_exp();
        Some(ins)
    }

    // 注销与剔除共用的删除路径
    pub(super) async fn cancel_instance(
        &self,
        zone: &str,
        env: &str,
        app_id: &str,
        hostname: &str,
        latest_time: i64,
    ) -> Option<Instance> {
        let apps = self.apps(app_id, env)?;
        let (ins, remaining) = apps
            .app(zone)
            .iter()
            .find_map(|app| app.cancel(hostname, latest_time))?;

        apps.update_latest(latest_time);
        if remaining == 0 {
            apps.del(&ins.zone);
        }
        let key = apps_key(app_id, env);
        if self.appm.remove_if(&key, |_, apps| apps.is_empty()).is_some() {
            tracing::info!(key = %key, "Removed empty apps from registry");
        }

        tracing::info!(
            app_id = %app_id,
            env = %env,
            zone = %ins.zone,
            hostname = %hostname,
            "Cancelled instance"
        );

        self.broadcast(env, app_id).await;
        Some(ins)
    }

    /// 修改实例状态/元数据，任一 hostname 不存在时不做修改并返回 false
    pub async fn set(&self, arg: &ArgSet) -> bool {
        let Some(apps) = self.apps(&arg.app_id, &arg.env) else {
            return false;
        };
        if !apps.app(&arg.zone).iter().any(|app| app.set(arg)) {
            return false;
        }
        apps.update_latest(arg.set_timestamp);

        tracing::info!(
            app_id = %arg.app_id,
            env = %arg.env,
            zone = %arg.zone,
            hostnames = ?arg.hostnames,
            "Updated instance status/metadata"
        );

        self.broadcast(&arg.env, &arg.app_id).await;
        true
    }

    /// 查询视图；zone 为空表示全部可用区，指定的可用区不存在时返回 `NotFound`
    pub fn fetch(
        &self,
        zone: &str,
        env: &str,
        app_id: &str,
        since: i64,
        status: StatusFilter,
    ) -> Result<InstanceInfo, RegistryError> {
        let apps = self.apps(app_id, env).ok_or_else(|| RegistryError::NotFound {
            key: apps_key(app_id, env),
        })?;
        let mut info = apps
            .instance_info(zone, since, status)
            .map_err(|e| match e {
                RegistryError::NotFound { key } => RegistryError::NotFound {
                    key: format!("{}/{key}", apps_key(app_id, env)),
                },
                e => e,
            })?;
        info.scheduler = self.scheduler.get(app_id, env);
        Ok(info)
    }

    // 全量快照：app_id -> 全部可用区的实例
    pub fn fetch_all(&self) -> HashMap<String, Vec<Instance>> {
        let mut all: HashMap<String, Vec<Instance>> = HashMap::new();
        for apps in self.all_apps() {
            for app in apps.app("") {
                all.entry(app.app_id.clone())
                    .or_default()
                    .extend(app.instances());
            }
        }
        all
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.task_tracker.close();
    }
}
