use std::sync::Arc;
use std::time::Duration;

use discovery_registry::services::model::{
    ArgRegister, ArgRenew, Instance, StatusFilter, now_nanos,
};
use discovery_registry::services::registry::{
    Registry, RegistryConfig, RegistryError, StaticScheduler,
};
use tokio::time::{sleep, timeout};

const SECOND: i64 = 1_000_000_000;

fn new_registry(config: RegistryConfig) -> Arc<Registry> {
    Registry::new(config, Arc::new(StaticScheduler::default()))
}

fn instance(app_id: &str, zone: &str, hostname: &str) -> Instance {
    Instance::new(ArgRegister {
        zone: zone.to_string(),
        env: "default".to_string(),
        app_id: app_id.to_string(),
        hostname: hostname.to_string(),
        ..Default::default()
    })
}

fn renew_arg(app_id: &str, zone: &str, hostname: &str) -> ArgRenew {
    ArgRenew {
        zone: zone.to_string(),
        env: "default".to_string(),
        app_id: app_id.to_string(),
        hostname: hostname.to_string(),
    }
}

// 注册 n 个实例，分布在两个服务上
async fn register_many(registry: &Registry, n: usize, latest_time: i64) -> Vec<(String, String)> {
    let mut hosts = Vec::new();
    for i in 0..n {
        let app_id = if i % 2 == 0 { "svc-a" } else { "svc-b" };
        let hostname = format!("host-{i}");
        registry
            .register(instance(app_id, "c1", &hostname), latest_time)
            .await;
        hosts.push((app_id.to_string(), hostname));
    }
    hosts
}

fn total(registry: &Registry) -> usize {
    registry.fetch_all().values().map(Vec::len).sum()
}

#[tokio::test]
async fn test_eviction_is_capped_per_cycle() {
    let registry = new_registry(RegistryConfig::default());
    let registered_at = now_nanos();
    let hosts = register_many(&registry, 10, registered_at).await;

    // 每个实例续约两次，续约率达到期望值，不进入保护
    for (app_id, hostname) in &hosts {
        for _ in 0..2 {
            registry.renew(&renew_arg(app_id, "c1", hostname)).unwrap();
        }
    }
    registry.guard().update_fac();
    assert!(!registry.guard().protected());

    // 全部空闲超过 90s，但单轮最多剔除 10 - floor(10 * 0.85) = 2 个
    let evicted = registry.evict_at(registered_at + 120 * SECOND).await;
    assert_eq!(evicted, 2);
    assert_eq!(total(&registry), 8);
    assert_eq!(registry.guard().stats().expected_per_min, 16);

    // 剩 8 个时上限为 8 - floor(8 * 0.85) = 2
    let evicted = registry.evict_at(registered_at + 120 * SECOND).await;
    assert_eq!(evicted, 2);
    assert_eq!(total(&registry), 6);
}

#[tokio::test]
async fn test_protected_mode_only_evicts_past_ceiling() {
    let registry = new_registry(RegistryConfig::default());
    let registered_at = now_nanos();
    register_many(&registry, 10, registered_at).await;

    // 没有任何续约，上一窗口续约数低于阈值
    registry.guard().update_fac();
    assert!(registry.guard().protected());

    assert_eq!(registry.evict_at(registered_at + 120 * SECOND).await, 0);
    assert_eq!(total(&registry), 10);

    assert_eq!(registry.evict_at(registered_at + 3601 * SECOND).await, 2);
    assert_eq!(total(&registry), 8);
}

#[tokio::test]
async fn test_healthy_mode_evicts_idle_instance() {
    let registry = new_registry(RegistryConfig::default());
    let now = now_nanos();
    let hosts = register_many(&registry, 19, now).await;
    registry
        .register(instance("svc-c", "c1", "stale-host"), now - 200 * SECOND)
        .await;

    for (app_id, hostname) in &hosts {
        for _ in 0..2 {
            registry.renew(&renew_arg(app_id, "c1", hostname)).unwrap();
        }
    }
    registry.guard().update_fac();
    assert!(!registry.guard().protected());

    assert_eq!(registry.evict().await, 1);
    let err = registry
        .fetch("", "default", "svc-c", 0, StatusFilter::Up)
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert_eq!(total(&registry), 19);
}

#[tokio::test]
async fn test_protected_mode_keeps_idle_instance() {
    let registry = new_registry(RegistryConfig::default());
    let now = now_nanos();
    register_many(&registry, 19, now).await;
    registry
        .register(instance("svc-c", "c1", "stale-host"), now - 200 * SECOND)
        .await;

    registry.guard().update_fac();
    assert!(registry.guard().protected());
    assert_eq!(registry.evict().await, 0);
    assert!(registry.fetch("", "default", "svc-c", 0, StatusFilter::Up).is_ok());
}

#[tokio::test]
async fn test_evict_empty_registry() {
    let registry = new_registry(RegistryConfig::default());
    registry.guard().update_fac();
    assert_eq!(registry.evict().await, 0);
}

#[tokio::test]
async fn test_reset_exp_from_scan() {
    let registry = new_registry(RegistryConfig::default());
    register_many(&registry, 3, now_nanos()).await;
    registry.guard().set_exp(0);
    assert_eq!(registry.guard().stats().expected_per_min, 0);

    registry.reset_exp();
    assert_eq!(registry.guard().stats().expected_per_min, 6);
}

#[tokio::test]
async fn test_periodic_driver_evicts() {
    let registry = new_registry(RegistryConfig {
        evict_percent_threshold: 0.5,
        evict_threshold: Duration::from_millis(100),
        evict_ceiling: Duration::from_secs(1),
        evict_interval: Duration::from_millis(50),
        ..RegistryConfig::default()
    });
    let long_ago = now_nanos() - 10 * SECOND;
    registry.register(instance("svc", "c1", "host-1"), long_ago).await;
    registry.register(instance("svc", "c1", "host-2"), long_ago).await;

    registry.start();

    timeout(Duration::from_secs(3), async {
        while registry
            .fetch("", "default", "svc", 0, StatusFilter::Up)
            .is_ok()
        {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("driver should evict all idle instances");
    assert_eq!(total(&registry), 0);
}
