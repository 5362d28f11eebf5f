use thiserror::Error;

/// 注册表查询错误
///
/// `NotModified` 不是真正的失败：调用方据此继续长轮询。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Nothing found for key: {key}")]
    NotFound { key: String },

    #[error("Not modified since latest timestamp: {latest_timestamp}")]
    NotModified { latest_timestamp: i64 },
}
