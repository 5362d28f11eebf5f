use std::sync::Arc;

use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::service::Registry;
use crate::services::model::{Instance, now_nanos};

impl Registry {
    /// 启动后台周期任务：每分钟快照续约窗口并剔除，每 15 分钟校正期望续约数
    ///
    /// 任务只持有弱引用，注册表被释放后自动退出。
    pub fn start(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        let evict_interval = self.config.evict_interval;
        let reset_exp_interval = self.config.reset_exp_interval;

        self.task_tracker.spawn(async move {
            let mut evict_tick = interval_at(Instant::now() + evict_interval, evict_interval);
            let mut reset_tick = interval_at(Instant::now() + reset_exp_interval, reset_exp_interval);
            evict_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            reset_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = evict_tick.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.guard.update_fac();
                        registry.evict().await;
                    }
                    _ = reset_tick.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.reset_exp();
                    }
                }
            }
            tracing::debug!("Registry dropped, stopping periodic tasks");
        });
    }

    // 全量扫描，重置期望续约数
    pub fn reset_exp(&self) {
        let count: usize = self.all_apps().iter().map(|apps| apps.len()).sum();
        self.guard.set_exp(count as i64);
        tracing::debug!(instances = count, "Reset expected renews");
    }

    pub async fn evict(&self) -> usize {
        self.evict_at(now_nanos()).await
    }

    /// 以 `now`（Unix 纳秒）为当前时间执行一轮剔除，返回剔除数量
    pub async fn evict_at(&self, now: i64) -> usize {
        let protected = self.guard.protected();
        let threshold = self.config.evict_threshold.as_nanos() as i64;
        let ceiling = self.config.evict_ceiling.as_nanos() as i64;

        // 先收集全部过期实例，再随机剔除，避免整个服务被一次清空
        let mut candidates: Vec<Instance> = Vec::new();
        let mut registry_size = 0usize;
        for apps in self.all_apps() {
            for app in apps.app("") {
                let instances = app.instances();
                registry_size += instances.len();
                candidates.extend(instances.into_iter().filter(|ins| {
                    let idle = ins.idle_nanos(now);
                    (!protected && idle > threshold) || idle > ceiling
                }));
            }
        }

        // 以注册表当前规模为基准限制单轮剔除数量，防止时钟漂移或停顿时清空注册表
        let size_threshold = (registry_size as f64 * self.config.evict_percent_threshold) as usize;
        let eviction_limit = registry_size.saturating_sub(size_threshold);
        let evict_count = candidates.len().min(eviction_limit);
        if evict_count == 0 {
            if !candidates.is_empty() {
                tracing::warn!(
                    candidates = candidates.len(),
                    registry_size,
                    "Eviction limit reached zero, skipping expired instances"
                );
            }
            return 0;
        }

        // Knuth 洗牌，只打乱前 evict_count 个
        {
            let mut rng = rand::thread_rng();
            for i in 0..evict_count {
                let next = rng.gen_range(i..candidates.len());
                candidates.swap(i, next);
            }
        }
        candidates.truncate(evict_count);

        tracing::info!(
            registry_size,
            evict_count,
            protected,
            "Evicting expired instances"
        );

        let mut evicted = 0;
        for ins in candidates {
            if self
                .cancel_instance(&ins.zone, &ins.env, &ins.app_id, &ins.hostname, now)
                .await
                .is_some()
            {
                self.guard.decr_exp();
                evicted += 1;
                tracing::warn!(
                    app_id = %ins.app_id,
                    env = %ins.env,
                    zone = %ins.zone,
                    hostname = %ins.hostname,
                    idle_secs = ins.idle_nanos(now) / 1_000_000_000,
                    "Evicted expired instance"
                );
            }
        }
        evicted
    }
}
