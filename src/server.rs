use std::sync::Arc;

use crate::config::Config;
use crate::services::registry::{Registry, RegistryConfig, StaticScheduler};

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // 初始化调度信息与注册表
    let scheduler = Arc::new(StaticScheduler::from_config(&config.scheduler));
    let registry = Registry::new(RegistryConfig::from(&config.registry), scheduler);

    // 启动周期性自我保护统计与剔除任务
    registry.start();

    tracing::info!(
        node = %config.server.node,
        evict_interval_secs = config.registry.evict_interval_secs,
        reset_exp_interval_secs = config.registry.reset_exp_interval_secs,
        "Discovery registry node started"
    );

    tokio::signal::ctrl_c().await?;

    let instances: usize = registry.fetch_all().values().map(Vec::len).sum();
    tracing::info!(
        node = %config.server.node,
        instances,
        "Shutting down discovery registry node"
    );
    Ok(())
}
