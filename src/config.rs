use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const ENV_PREFIX: &str = "DISCOVERY_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to read environment overrides: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub registry: RegistrySection,
    pub scheduler: Vec<SchedulerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// 本节点名称，仅用于日志
    pub node: String,
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            node: "discovery-node".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub renew_percent_threshold: f64,
    pub evict_percent_threshold: f64,
    pub renews_per_instance: i64,
    pub evict_threshold_secs: u64,
    pub evict_ceiling_secs: u64,
    pub evict_interval_secs: u64,
    pub reset_exp_interval_secs: u64,
    pub broadcast_timeout_ms: u64,
    pub poll_channel_capacity: usize,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            renew_percent_threshold: 0.85,
            evict_percent_threshold: 0.85,
            renews_per_instance: 2,
            evict_threshold_secs: 90,
            evict_ceiling_secs: 3600,
            evict_interval_secs: 60,
            reset_exp_interval_secs: 900,
            broadcast_timeout_ms: 500,
            poll_channel_capacity: 5,
        }
    }
}

// 静态调度信息：zone -> 客户端数量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub app_id: String,
    pub env: String,
    #[serde(default)]
    pub clients: HashMap<String, u64>,
}

// DISCOVERY_ 前缀的环境变量覆盖
#[derive(Debug, Deserialize)]
struct EnvOverrides {
    config: Option<String>,
    node: Option<String>,
    log_level: Option<String>,
    renew_percent_threshold: Option<f64>,
    evict_percent_threshold: Option<f64>,
    evict_threshold_secs: Option<u64>,
    evict_ceiling_secs: Option<u64>,
    broadcast_timeout_ms: Option<u64>,
}

impl Config {
    /// 加载 .env、配置文件（DISCOVERY_CONFIG 或 config.toml），再应用环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;

        let path = overrides
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(node) = overrides.node {
            self.server.node = node;
        }
        if let Some(level) = overrides.log_level {
            self.server.log_level = level;
        }
        let registry = &mut self.registry;
        if let Some(v) = overrides.renew_percent_threshold {
            registry.renew_percent_threshold = v;
        }
        if let Some(v) = overrides.evict_percent_threshold {
            registry.evict_percent_threshold = v;
        }
        if let Some(v) = overrides.evict_threshold_secs {
            registry.evict_threshold_secs = v;
        }
        if let Some(v) = overrides.evict_ceiling_secs {
            registry.evict_ceiling_secs = v;
        }
        if let Some(v) = overrides.broadcast_timeout_ms {
            registry.broadcast_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;
        for (name, value) in [
            ("renew_percent_threshold", registry.renew_percent_threshold),
            ("evict_percent_threshold", registry.evict_percent_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if registry.renews_per_instance <= 0 {
            return Err(ConfigError::Invalid(
                "renews_per_instance must be positive".to_string(),
            ));
        }
        if registry.evict_interval_secs == 0 || registry.reset_exp_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "evict_interval_secs and reset_exp_interval_secs must be non-zero".to_string(),
            ));
        }
        if registry.evict_ceiling_secs < registry.evict_threshold_secs {
            return Err(ConfigError::Invalid(
                "evict_ceiling_secs must not be below evict_threshold_secs".to_string(),
            ));
        }
        if registry.poll_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "poll_channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
