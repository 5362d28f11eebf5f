use std::collections::HashSet;
use std::sync::Arc;

use http::Uri;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_WEIGHT, Discovery, META_CLUSTER, META_WEIGHT, NamingError, SCHEME};
use crate::services::model::{Instance, InstanceInfo};

// 解析后的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub env: String,
    pub app_id: String,
    pub zone: String,
    pub clusters: HashSet<String>,
}

impl Target {
    /// 解析 `discovery://<env>/<app_id>?zone=z&cluster=c1&cluster=c2`
    pub fn parse(target: &str) -> Result<Self, NamingError> {
        let invalid = |reason: &str| NamingError::InvalidTarget(format!("{target}: {reason}"));

        let uri: Uri = target.parse().map_err(|_| invalid("malformed uri"))?;
        if uri.scheme_str() != Some(SCHEME) {
            return Err(invalid("unsupported scheme"));
        }
        let env = uri
            .authority()
            .map(|authority| authority.host().to_string())
            .filter(|env| !env.is_empty())
            .ok_or_else(|| invalid("missing env"))?;
        let app_id = uri.path().trim_matches('/').to_string();
        if app_id.is_empty() {
            return Err(invalid("missing app id"));
        }

        let mut zone = String::new();
        let mut clusters = HashSet::new();
        for pair in uri.query().unwrap_or_default().split('&') {
            match pair.split_once('=') {
                Some(("zone", value)) => zone = value.to_string(),
                Some(("cluster", value)) if !value.is_empty() => {
                    clusters.insert(value.to_string());
                }
                _ => {}
            }
        }

        Ok(Self {
            env,
            app_id,
            zone,
            clusters,
        })
    }

    /// 目标可用区的实例；该可用区不存在时退回全部可用区
    pub fn select_instances(&self, info: &InstanceInfo) -> Vec<Instance> {
        if let Some(instances) = info.instances.get(&self.zone) {
            return instances.clone();
        }
        info.instances.values().flatten().cloned().collect()
    }

    pub fn resolve(&self, instances: &[Instance]) -> Vec<ResolvedAddress> {
        instances
            .iter()
            .filter(|ins| {
                self.clusters.is_empty()
                    || ins
                        .metadata
                        .get(META_CLUSTER)
                        .is_some_and(|cluster| self.clusters.contains(cluster))
            })
            .filter_map(|ins| {
                let addr = grpc_authority(&ins.addrs)?;
                let weight = ins
                    .metadata
                    .get(META_WEIGHT)
                    .and_then(|w| w.parse().ok())
                    .unwrap_or(DEFAULT_WEIGHT);
                Some(ResolvedAddress {
                    addr,
                    server_name: ins.app_id.clone(),
                    zone: ins.zone.clone(),
                    weight,
                })
            })
            .collect()
    }
}

// 取最后一个 grpc:// 地址的 host:port
fn grpc_authority(addrs: &[String]) -> Option<String> {
    addrs
        .iter()
        .filter_map(|addr| addr.parse::<Uri>().ok())
        .filter(|uri| uri.scheme_str() == Some("grpc"))
        .filter_map(|uri| uri.authority().map(|authority| authority.to_string()))
        .last()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub addr: String,
    pub server_name: String,
    pub zone: String,
    pub weight: u64,
}

/// 地址解析器，在后台根据 watch 信号刷新地址列表
#[derive(Debug)]
pub struct Resolver {
    target: Target,
    addresses: watch::Receiver<Vec<ResolvedAddress>>,
    quit: CancellationToken,
}

impl Resolver {
    /// 需要在 tokio 运行时内调用
    pub fn build(target: &str, discovery: Arc<dyn Discovery>) -> Result<Self, NamingError> {
        let target = Target::parse(target)?;
        let (tx, addresses) = watch::channel(Vec::new());
        let quit = CancellationToken::new();

        tracing::info!(
            env = %target.env,
            app_id = %target.app_id,
            zone = %target.zone,
            clusters = ?target.clusters,
            "Building resolver"
        );

        tokio::spawn(Self::update_loop(target.clone(), discovery, tx, quit.clone()));

        Ok(Self {
            target,
            addresses,
            quit,
        })
    }

    async fn update_loop(
        target: Target,
        discovery: Arc<dyn Discovery>,
        tx: watch::Sender<Vec<ResolvedAddress>>,
        quit: CancellationToken,
    ) {
        let mut events = discovery.watch();
        loop {
            tokio::select! {
                _ = quit.cancelled() => return,
                event = events.recv() => {
                    if event.is_none() {
                        tracing::debug!(app_id = %target.app_id, "Discovery watch closed");
                        return;
                    }
                }
            }

            let Some(info) = discovery.fetch() else {
                continue;
            };
            let instances = target.select_instances(&info);
            if instances.is_empty() {
                continue;
            }
            let addrs = target.resolve(&instances);
            tracing::debug!(
                app_id = %target.app_id,
                addresses = addrs.len(),
                "Resolver updated addresses"
            );
            tx.send_replace(addrs);
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn addresses(&self) -> Vec<ResolvedAddress> {
        self.addresses.borrow().clone()
    }

    /// 地址列表更新流，先产出当前值
    pub fn updates(&self) -> WatchStream<Vec<ResolvedAddress>> {
        WatchStream::new(self.addresses.clone())
    }

    pub fn close(&self) {
        self.quit.cancel();
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.quit.cancel();
    }
}
