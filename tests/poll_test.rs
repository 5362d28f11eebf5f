use std::sync::Arc;
use std::time::{Duration, Instant};

use discovery_registry::services::model::{
    ArgCancel, ArgPolls, ArgRegister, Instance, StatusFilter, now_nanos,
};
use discovery_registry::services::registry::{Registry, RegistryConfig, StaticScheduler};
use tokio::time::timeout;

fn new_registry(config: RegistryConfig) -> Arc<Registry> {
    Registry::new(config, Arc::new(StaticScheduler::default()))
}

fn instance(app_id: &str, hostname: &str) -> Instance {
    Instance::new(ArgRegister {
        zone: "c1".to_string(),
        env: "default".to_string(),
        app_id: app_id.to_string(),
        hostname: hostname.to_string(),
        ..Default::default()
    })
}

fn poll_arg(app_ids: &[&str], latest_timestamps: Vec<i64>, hostname: &str) -> ArgPolls {
    ArgPolls {
        env: "default".to_string(),
        app_ids: app_ids.iter().map(|id| id.to_string()).collect(),
        latest_timestamps,
        zone: "c1".to_string(),
        hostname: hostname.to_string(),
    }
}

fn latest(registry: &Registry, app_id: &str) -> i64 {
    registry
        .fetch("", "default", app_id, 0, StatusFilter::Up)
        .expect("app should exist")
        .latest_timestamp
}

#[tokio::test]
async fn test_stale_poll_returns_immediately() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;

    let result = registry.polls(&poll_arg(&["svc"], vec![0], "client-a"));
    assert!(result.fresh);
    assert!(result.miss.is_empty());

    let payload = result.receiver.try_recv().expect("payload should be ready");
    assert_eq!(payload["svc"].len(), 1);
    assert_eq!(payload["svc"].latest_timestamp, latest(&registry, "svc"));
    assert_eq!(registry.conn_count("default", "svc", "client-a"), None);
}

#[tokio::test]
async fn test_waiting_poll_woken_by_register() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    let seen = latest(&registry, "svc");

    let result = registry.polls(&poll_arg(&["svc"], vec![seen], "client-b"));
    assert!(!result.fresh);
    assert!(result.receiver.try_recv().is_none());
    assert_eq!(registry.conn_count("default", "svc", "client-b"), Some(1));

    registry.register(instance("svc", "host-2"), now_nanos()).await;

    let payload = timeout(Duration::from_secs(1), result.receiver.recv())
        .await
        .expect("timeout waiting for broadcast")
        .expect("channel closed without payload");
    let info = &payload["svc"];
    assert_ne!(info.latest_timestamp, seen);
    assert_eq!(info.len(), 2);
    // 投递后连接记录被移除，需要重新轮询
    assert_eq!(registry.conn_count("default", "svc", "client-b"), None);
}

#[tokio::test]
async fn test_same_host_polls_share_connection() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    let seen = latest(&registry, "svc");

    let first = registry.polls(&poll_arg(&["svc"], vec![seen], "client-c"));
    let second = registry.polls(&poll_arg(&["svc"], vec![seen], "client-c"));
    assert!(!first.fresh && !second.fresh);
    assert_eq!(registry.conn_count("default", "svc", "client-c"), Some(2));

    registry.register(instance("svc", "host-2"), now_nanos()).await;

    // 共用一个通道，恰好投递两次
    assert!(first.receiver.try_recv().is_some());
    assert!(second.receiver.try_recv().is_some());
    assert!(first.receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_del_conns_reference_counting() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    let seen = latest(&registry, "svc");
    let arg = poll_arg(&["svc"], vec![seen], "client-d");

    let _first = registry.polls(&arg);
    let _second = registry.polls(&arg);
    assert_eq!(registry.conn_count("default", "svc", "client-d"), Some(2));

    registry.del_conns(&arg);
    assert_eq!(registry.conn_count("default", "svc", "client-d"), Some(1));
    registry.del_conns(&arg);
    assert_eq!(registry.conn_count("default", "svc", "client-d"), None);
    // 已不存在的记录是无操作
    registry.del_conns(&arg);
    assert_eq!(registry.conn_count("default", "svc", "client-d"), None);
}

#[tokio::test]
async fn test_unknown_app_reported_as_miss() {
    let registry = new_registry(RegistryConfig::default());

    let result = registry.polls(&poll_arg(&["ghost"], vec![0], "client-e"));
    assert!(!result.fresh);
    assert_eq!(result.miss, vec!["ghost".to_string()]);
    assert_eq!(registry.conn_count("default", "ghost", "client-e"), Some(1));

    // 之后注册会唤醒等待者
    registry.register(instance("ghost", "host-1"), now_nanos()).await;
    let payload = timeout(Duration::from_secs(1), result.receiver.recv())
        .await
        .expect("timeout waiting for broadcast")
        .expect("channel closed without payload");
    assert_eq!(payload["ghost"].len(), 1);
}

#[tokio::test]
async fn test_fresh_data_skips_waiting_for_unchanged_ids() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    registry.register(instance("other", "host-1"), now_nanos()).await;
    let other_seen = latest(&registry, "other");

    let result = registry.polls(&poll_arg(&["svc", "other"], vec![0, other_seen], "client-f"));
    assert!(result.fresh);
    let payload = result.receiver.try_recv().expect("payload should be ready");
    assert!(payload.contains_key("svc"));
    assert!(!payload.contains_key("other"));
    assert_eq!(registry.conn_count("default", "other", "client-f"), None);
}

#[tokio::test]
async fn test_mismatched_timestamps_treated_as_zero() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    registry.register(instance("other", "host-1"), now_nanos()).await;

    let result = registry.polls(&poll_arg(&["svc", "other"], vec![i64::MAX], "client-g"));
    assert!(result.fresh);
    let payload = result.receiver.try_recv().expect("payload should be ready");
    assert_eq!(payload.len(), 2);
}

#[tokio::test]
async fn test_multi_app_waiters_share_one_channel() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    registry.register(instance("other", "host-1"), now_nanos()).await;
    let timestamps = vec![latest(&registry, "svc"), latest(&registry, "other")];

    let result = registry.polls(&poll_arg(&["svc", "other"], timestamps, "client-h"));
    assert!(!result.fresh);

    registry.register(instance("other", "host-2"), now_nanos()).await;
    let payload = timeout(Duration::from_secs(1), result.receiver.recv())
        .await
        .expect("timeout waiting for broadcast")
        .expect("channel closed without payload");
    assert!(payload.contains_key("other"));
    // svc 的等待仍然保留
    assert_eq!(registry.conn_count("default", "svc", "client-h"), Some(1));
}

#[tokio::test]
async fn test_full_channel_does_not_block_mutation() {
    let registry = new_registry(RegistryConfig {
        poll_channel_capacity: 1,
        broadcast_timeout: Duration::from_millis(20),
        ..RegistryConfig::default()
    });
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    let seen = latest(&registry, "svc");
    let arg = poll_arg(&["svc"], vec![seen], "client-i");

    let result = registry.polls(&arg);
    let _again = registry.polls(&arg);

    let started = Instant::now();
    registry.register(instance("svc", "host-2"), now_nanos()).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    // 第二次投递因通道已满被丢弃
    assert!(result.receiver.try_recv().is_some());
    assert!(result.receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_cancel_wakes_waiters() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    registry.register(instance("svc", "host-2"), now_nanos()).await;
    let seen = latest(&registry, "svc");

    let result = registry.polls(&poll_arg(&["svc"], vec![seen], "client-j"));
    registry
        .cancel(&ArgCancel {
            zone: "c1".to_string(),
            env: "default".to_string(),
            app_id: "svc".to_string(),
            hostname: "host-1".to_string(),
            latest_timestamp: now_nanos(),
        })
        .await;

    let payload = timeout(Duration::from_secs(1), result.receiver.recv())
        .await
        .expect("timeout waiting for broadcast")
        .expect("channel closed without payload");
    assert_eq!(payload["svc"].len(), 1);
    assert_eq!(payload["svc"].instances["c1"][0].hostname, "host-2");
}

#[tokio::test]
async fn test_unknown_zone_reported_as_miss() {
    let registry = new_registry(RegistryConfig::default());
    registry.register(instance("svc", "host-1"), now_nanos()).await;

    let mut arg = poll_arg(&["svc"], vec![0], "client-k");
    arg.zone = "zz".to_string();
    let result = registry.polls(&arg);
    assert!(!result.fresh);
    assert_eq!(result.miss, vec!["svc".to_string()]);
    assert_eq!(registry.conn_count("default", "svc", "client-k"), Some(1));

    // 广播时该可用区仍不存在，跳过投递
    registry.register(instance("svc", "host-2"), now_nanos()).await;
    assert!(result.receiver.try_recv().is_none());
    assert_eq!(registry.conn_count("default", "svc", "client-k"), None);
}

#[tokio::test]
async fn test_broadcast_skips_departed_poller() {
    let registry = new_registry(RegistryConfig {
        poll_channel_capacity: 1,
        broadcast_timeout: Duration::from_secs(5),
        ..RegistryConfig::default()
    });
    registry.register(instance("svc", "host-1"), now_nanos()).await;
    let seen = latest(&registry, "svc");
    let arg = poll_arg(&["svc"], vec![seen], "client-l");

    let first = registry.polls(&arg);
    let second = registry.polls(&arg);
    assert_eq!(registry.conn_count("default", "svc", "client-l"), Some(2));
    // 轮询方断开但没有调用 del_conns
    drop(first);
    drop(second);

    let started = Instant::now();
    registry.register(instance("svc", "host-2"), now_nanos()).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(registry.conn_count("default", "svc", "client-l"), None);
}
