use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::config::RegistrySection;
use crate::services::model::{ArgPolls, InstanceInfo};

/// 长轮询投递内容：app_id -> 最新视图
pub type PollPayload = HashMap<String, InstanceInfo>;

// 注册表运行参数
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 续约比例低于该阈值时进入自我保护
    pub renew_percent_threshold: f64,
    /// 单轮剔除上限：size - floor(size * evict_percent_threshold)
    pub evict_percent_threshold: f64,
    /// 每个实例每分钟期望的续约次数
    pub renews_per_instance: i64,
    pub evict_threshold: Duration,
    pub evict_ceiling: Duration,
    pub evict_interval: Duration,
    pub reset_exp_interval: Duration,
    pub broadcast_timeout: Duration,
    pub poll_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            renew_percent_threshold: 0.85,
            evict_percent_threshold: 0.85,
            renews_per_instance: 2,
            evict_threshold: Duration::from_secs(90),
            evict_ceiling: Duration::from_secs(3600),
            evict_interval: Duration::from_secs(60),
            reset_exp_interval: Duration::from_secs(15 * 60),
            broadcast_timeout: Duration::from_millis(500),
            poll_channel_capacity: 5,
        }
    }
}

impl From<&RegistrySection> for RegistryConfig {
    fn from(section: &RegistrySection) -> Self {
        Self {
            renew_percent_threshold: section.renew_percent_threshold,
            evict_percent_threshold: section.evict_percent_threshold,
            renews_per_instance: section.renews_per_instance,
            evict_threshold: Duration::from_secs(section.evict_threshold_secs),
            evict_ceiling: Duration::from_secs(section.evict_ceiling_secs),
            evict_interval: Duration::from_secs(section.evict_interval_secs),
            reset_exp_interval: Duration::from_secs(section.reset_exp_interval_secs),
            broadcast_timeout: Duration::from_millis(section.broadcast_timeout_ms),
            poll_channel_capacity: section.poll_channel_capacity,
        }
    }
}

/// 长轮询的接收端
///
/// 同一 hostname 的多个逻辑订阅共用一个通道，所以接收端可以克隆，
/// 每条投递只会被其中一个订阅取走。
#[derive(Debug, Clone)]
pub struct PollReceiver {
    inner: Arc<Mutex<mpsc::Receiver<PollPayload>>>,
}

impl PollReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<PollPayload>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// 等待下一次投递；所有发送端都已释放且队列为空时返回 `None`
    pub async fn recv(&self) -> Option<PollPayload> {
        self.inner.lock().await.recv().await
    }

    pub fn try_recv(&self) -> Option<PollPayload> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}

// Polls 的返回结果
#[derive(Debug)]
pub struct PollResult {
    pub receiver: PollReceiver,
    /// 至少一个 app_id 有新数据，receiver 中已经放好了结果
    pub fresh: bool,
    /// 本节点完全不认识的 app_id
    pub miss: Vec<String>,
}

// 等待中的长轮询连接
#[derive(Debug)]
pub(crate) struct PollConn {
    pub(crate) tx: mpsc::Sender<PollPayload>,
    pub(crate) rx: PollReceiver,
    pub(crate) arg: Arc<ArgPolls>,
    pub(crate) latest_timestamp: i64,
    pub(crate) count: usize,
}

// 自我保护计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardStats {
    pub expected_per_min: i64,
    pub expected_threshold: i64,
    pub renews_in_min: i64,
    pub renews_last_min: i64,
}
