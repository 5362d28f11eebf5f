//! Client-side naming adapter
//!
//! Turns registry fetch results into a resolved address list for a
//! `discovery://<env>/<app_id>?zone=..&cluster=..` target and republishes it
//! whenever the discovery source signals a change.

pub mod local;
pub mod resolver;

pub use local::LocalDiscovery;
pub use resolver::{ResolvedAddress, Resolver, Target};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::services::model::InstanceInfo;

pub const SCHEME: &str = "discovery";
/// 实例元数据中的集群标签
pub const META_CLUSTER: &str = "cluster";
pub const META_WEIGHT: &str = "weight";
pub const DEFAULT_WEIGHT: u64 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

/// 发现数据来源
///
/// `watch` 返回的通道只是“需要重新获取”的信号，不携带数据。
pub trait Discovery: Send + Sync {
    fn fetch(&self) -> Option<InstanceInfo>;
    fn watch(&self) -> mpsc::Receiver<()>;
}
