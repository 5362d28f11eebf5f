use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::Discovery;
use crate::services::model::{ArgPolls, InstanceInfo};
use crate::services::registry::Registry;

const WATCH_CAPACITY: usize = 10;

/// 进程内的发现来源：通过注册表长轮询获取变更并发出 watch 信号
#[derive(Debug)]
pub struct LocalDiscovery {
    latest: watch::Receiver<Option<InstanceInfo>>,
    watchers: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
    quit: CancellationToken,
}

impl LocalDiscovery {
    /// 启动后台长轮询，`hostname` 标识本客户端
    pub fn spawn(
        registry: Arc<Registry>,
        env: &str,
        app_id: &str,
        zone: &str,
        hostname: &str,
        poll_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, latest) = watch::channel(None);
        let watchers = Arc::new(Mutex::new(Vec::new()));
        let quit = CancellationToken::new();
        let arg = ArgPolls {
            env: env.to_string(),
            app_ids: vec![app_id.to_string()],
            latest_timestamps: vec![0],
            zone: zone.to_string(),
            hostname: hostname.to_string(),
        };

        tokio::spawn(Self::poll_loop(
            registry,
            arg,
            tx,
            watchers.clone(),
            poll_timeout,
            quit.clone(),
        ));

        Arc::new(Self {
            latest,
            watchers,
            quit,
        })
    }

    async fn poll_loop(
        registry: Arc<Registry>,
        mut arg: ArgPolls,
        tx: watch::Sender<Option<InstanceInfo>>,
        watchers: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
        poll_timeout: Duration,
        quit: CancellationToken,
    ) {
        let app_id = arg.app_ids[0].clone();
        loop {
            let result = registry.polls(&arg);
            let delivery = tokio::select! {
                _ = quit.cancelled() => {
                    if !result.fresh {
                        registry.del_conns(&arg);
                    }
                    return;
                }
                delivery = tokio::time::timeout(poll_timeout, result.receiver.recv()) => delivery,
            };

            match delivery {
                Ok(Some(mut payload)) => {
                    if let Some(info) = payload.remove(&app_id) {
                        arg.latest_timestamps = vec![info.latest_timestamp];
                        tx.send_replace(Some(info));
                        Self::notify(&watchers);
                    }
                }
                Ok(None) => {
                    // 连接被广播取走但没有数据，服务已不存在
                    arg.latest_timestamps = vec![0];
                    tx.send_replace(None);
                    Self::notify(&watchers);
                }
                Err(_) => {
                    tracing::debug!(app_id = %app_id, "Local poll timed out, re-polling");
                    registry.del_conns(&arg);
                }
            }
        }
    }

    fn notify(watchers: &Mutex<Vec<mpsc::Sender<()>>>) {
        if let Ok(mut watchers) = watchers.lock() {
            // 满了说明已有待处理的信号；关闭的直接丢弃
            watchers.retain(|watcher| !watcher.is_closed());
            for watcher in watchers.iter() {
                let _ = watcher.try_send(());
            }
        }
    }

    pub fn close(&self) {
        self.quit.cancel();
    }
}

impl Discovery for LocalDiscovery {
    fn fetch(&self) -> Option<InstanceInfo> {
        self.latest.borrow().clone()
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        // 先放一个信号，让新的观察者立即获取一次
        let _ = tx.try_send(());
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(tx);
        }
        rx
    }
}

impl Drop for LocalDiscovery {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}
