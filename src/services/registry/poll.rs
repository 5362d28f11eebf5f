use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use super::error::RegistryError;
use super::service::Registry;
use super::types::{PollConn, PollPayload, PollReceiver, PollResult};
use crate::services::model::{ArgPolls, StatusFilter};

fn poll_key(env: &str, app_id: &str) -> String {
    format!("{env}.{app_id}")
}

impl Registry {
    /// 长轮询
    ///
    /// 任一 app_id 有新数据时立即返回（receiver 中已有结果），此时其余未变更的
    /// app_id 不会登记等待，客户端需要重新发起轮询。否则为每个 app_id 登记
    /// 等待连接，本次新建的连接共用一个通道。
    ///
    /// 查询得到未变更与登记等待之间没有加锁，期间发生的广播不会投递给本次
    /// 调用，客户端只能等到轮询超时后重新发起。客户端应设置有限的轮询超时。
    pub fn polls(&self, arg: &ArgPolls) -> PollResult {
        let mut arg = arg.clone();
        if arg.latest_timestamps.len() != arg.app_ids.len() {
            arg.latest_timestamps = vec![0; arg.app_ids.len()];
        }

        let mut fresh: PollPayload = HashMap::new();
        let mut miss = Vec::new();
        for (app_id, since) in arg.app_ids.iter().zip(&arg.latest_timestamps) {
            match self.fetch(&arg.zone, &arg.env, app_id, *since, StatusFilter::Up) {
                Ok(info) => {
                    fresh.insert(app_id.clone(), info);
                }
                Err(RegistryError::NotFound { key }) => {
                    tracing::warn!(
                        zone = %arg.zone,
                        env = %arg.env,
                        app_id = %app_id,
                        key = %key,
                        "Polls for unknown app"
                    );
                    miss.push(app_id.clone());
                }
                Err(RegistryError::NotModified { .. }) => {}
            }
        }

        if !fresh.is_empty() {
            let (tx, rx) = mpsc::channel(1);
            // 新建的单容量通道，try_send 不会失败
            let _ = tx.try_send(fresh);
            return PollResult {
                receiver: PollReceiver::new(rx),
                fresh: true,
                miss,
            };
        }

        let arg = Arc::new(arg);
        let mut shared: Option<(mpsc::Sender<PollPayload>, PollReceiver)> = None;
        for (app_id, since) in arg.app_ids.iter().zip(&arg.latest_timestamps) {
            let mut hosts = self.conns.entry(poll_key(&arg.env, app_id)).or_default();
            match hosts.entry(arg.hostname.clone()) {
                Entry::Occupied(mut entry) => {
                    // 同一 hostname 可能有多个逻辑订阅
                    let conn = entry.get_mut();
                    conn.count += 1;
                    if shared.is_none() {
                        shared = Some((conn.tx.clone(), conn.rx.clone()));
                    }
                    tracing::info!(
                        hostname = %arg.hostname,
                        app_id = %app_id,
                        count = conn.count,
                        "Polls reuse connection"
                    );
                }
                Entry::Vacant(entry) => {
                    let (tx, rx) = shared
                        .get_or_insert_with(|| {
                            let (tx, rx) = mpsc::channel(self.config.poll_channel_capacity);
                            (tx, PollReceiver::new(rx))
                        })
                        .clone();
                    entry.insert(PollConn {
                        tx,
                        rx,
                        arg: arg.clone(),
                        latest_timestamp: *since,
                        count: 1,
                    });
                    tracing::info!(
                        hostname = %arg.hostname,
                        app_id = %app_id,
                        "Polls new connection"
                    );
                }
            }
        }

        let receiver = match shared {
            Some((_, rx)) => rx,
            // 没有任何 app_id，返回一个已关闭的通道
            None => PollReceiver::new(mpsc::channel(1).1),
        };
        PollResult {
            receiver,
            fresh: false,
            miss,
        }
    }

    /// 唤醒 (env, app_id) 上所有等待的连接，每条登记只投递一次
    pub(super) async fn broadcast(&self, env: &str, app_id: &str) {
        let Some((_, hosts)) = self.conns.remove(&poll_key(env, app_id)) else {
            return;
        };

        for (hostname, conn) in hosts {
            let PollConn {
                tx,
                rx,
                arg,
                latest_timestamp,
                count,
            } = conn;
            // 只剩登记持有的接收端时，轮询方已离开，发送会返回 Closed
            drop(rx);

            let info = match self.fetch(&arg.zone, env, app_id, 0, StatusFilter::Up) {
                Ok(info) => info,
                Err(e) => {
                    // 服务可能已被删除，客户端下次轮询会拿到错误
                    tracing::error!(
                        app_id = %app_id,
                        env = %env,
                        zone = %arg.zone,
                        error = %e,
                        "Broadcast fetch failed"
                    );
                    continue;
                }
            };

            for attempt in 1..=count {
                let payload = HashMap::from([(app_id.to_string(), info.clone())]);
                match tx.send_timeout(payload, self.config.broadcast_timeout).await {
                    Ok(()) => {
                        tracing::info!(
                            hostname = %hostname,
                            app_id = %app_id,
                            since = latest_timestamp,
                            attempt,
                            "Broadcast success"
                        );
                    }
                    Err(SendTimeoutError::Timeout(_)) => {
                        // 通道已满，说明没有在等待的消费者
                        tracing::info!(
                            hostname = %hostname,
                            app_id = %app_id,
                            attempt,
                            "Broadcast failed, channel maybe full"
                        );
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        tracing::info!(
                            hostname = %hostname,
                            app_id = %app_id,
                            attempt,
                            "Broadcast failed, poller gone"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// 客户端断开时调用，按 hostname 递减引用计数
    pub fn del_conns(&self, arg: &ArgPolls) {
        for app_id in &arg.app_ids {
            let key = poll_key(&arg.env, app_id);
            let Some(mut hosts) = self.conns.get_mut(&key) else {
                tracing::warn!(key = %key, "DelConns key not found");
                continue;
            };
            if let Entry::Occupied(mut entry) = hosts.entry(arg.hostname.clone()) {
                if entry.get().count > 1 {
                    entry.get_mut().count -= 1;
                    tracing::info!(
                        hostname = %arg.hostname,
                        count = entry.get().count,
                        "DelConns count decreased"
                    );
                } else {
                    entry.remove();
                    tracing::info!(hostname = %arg.hostname, "DelConns connection deleted");
                }
            }
            let is_empty = hosts.is_empty();
            drop(hosts);
            if is_empty {
                self.conns.remove_if(&key, |_, hosts| hosts.is_empty());
            }
        }
    }

    /// 某个 hostname 在 (env, app_id) 上登记的订阅数
    pub fn conn_count(&self, env: &str, app_id: &str, hostname: &str) -> Option<usize> {
        self.conns
            .get(&poll_key(env, app_id))
            .and_then(|hosts| hosts.get(hostname).map(|conn| conn.count))
    }
}
