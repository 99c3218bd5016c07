//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存防护层的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 顶层配置
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    /// 键值存储（Redis）配置
    #[serde(default)]
    pub store: StoreConfig,
    /// 缓存策略配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 分布式ID生成器配置
    #[serde(default)]
    pub id_generator: IdGeneratorConfig,
    /// 秒杀下单配置
    #[serde(default)]
    pub order: OrderConfig,
    /// 数据库配置（可选）
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Redis模式枚举
///
/// 定义支持的Redis部署模式
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
    /// 集群模式
    Cluster,
}

/// 键值存储配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// Redis 密码（可选）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
    /// 集群配置
    pub cluster: Option<ClusterConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            password: None,
            enable_tls: false,
            sentinel: None,
            cluster: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 集群配置
#[derive(Deserialize, Clone, Debug)]
pub struct ClusterConfig {
    /// 初始节点列表
    pub nodes: Vec<String>,
}

/// 缓存策略配置
///
/// 空值缓存、互斥锁重建和逻辑过期重建共用的参数
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 空值标记的过期时间（秒）
    pub null_ttl_secs: u64,
    /// 重建锁的键前缀
    pub lock_key_prefix: String,
    /// 重建锁的过期时间（秒）
    pub lock_ttl_secs: u64,
    /// 获取锁失败后的等待时间（毫秒）
    pub retry_backoff_ms: u64,
    /// 互斥重建的最大重试次数
    pub max_lock_retries: u32,
    /// TTL随机抖动比例，抖动取值范围为 `[0, ttl * ratio]`
    pub ttl_jitter_ratio: f64,
    /// 后台重建线程数
    pub rebuild_workers: usize,
    /// 后台重建队列容量
    pub rebuild_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl_secs: 120,
            lock_key_prefix: "lock:".to_string(),
            lock_ttl_secs: 10,
            retry_backoff_ms: 50,
            max_lock_retries: 200,
            ttl_jitter_ratio: 0.2,
            rebuild_workers: 10,
            rebuild_queue_capacity: 1024,
        }
    }
}

impl CacheConfig {
    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// 分布式ID生成器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct IdGeneratorConfig {
    /// 自定义纪元（Unix秒）
    pub epoch_secs: i64,
    /// 自增计数器键前缀
    pub key_prefix: String,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self {
            // 2022-01-01T00:00:00Z
            epoch_secs: 1_640_995_200,
            key_prefix: "icr:".to_string(),
        }
    }
}

/// 秒杀下单配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OrderConfig {
    /// 用户下单锁的键前缀
    pub lock_key_prefix: String,
    /// 用户下单锁的过期时间（秒）
    pub lock_ttl_secs: u64,
    /// 订单ID的业务标签
    pub id_tag: String,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            lock_key_prefix: "lock:order:".to_string(),
            lock_ttl_secs: 10,
            id_tag: "order".to_string(),
        }
    }
}

impl OrderConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// 数据库配置
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// 数据库连接URL，例如 `sqlite::memory:`、`mysql://...`
    pub url: String,
    /// 连接池最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// 连接超时时间（毫秒）
    #[serde(default = "default_db_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_db_connect_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// 从TOML字符串解析配置
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| CacheError::ConfigError(e.to_string()))?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从TOML文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        // 存储配置
        let store = &self.store;
        if !(100..=30000).contains(&store.connection_timeout_ms) {
            return Err("store connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }
        if !(100..=60000).contains(&store.command_timeout_ms) {
            return Err("store command_timeout_ms must be between 100 and 60000 ms".to_string());
        }
        match store.mode {
            RedisMode::Sentinel if store.sentinel.is_none() => {
                return Err("store mode 'sentinel' requires a [store.sentinel] section".to_string());
            }
            RedisMode::Cluster => match &store.cluster {
                Some(cluster) if !cluster.nodes.is_empty() => {}
                _ => {
                    return Err(
                        "store mode 'cluster' requires a non-empty [store.cluster] nodes list"
                            .to_string(),
                    )
                }
            },
            _ => {}
        }

        // 缓存策略
        let cache = &self.cache;
        if cache.null_ttl_secs == 0 {
            return Err("cache null_ttl_secs cannot be zero".to_string());
        }
        if cache.null_ttl_secs > 3600 {
            return Err("cache null_ttl_secs cannot exceed 3600 seconds".to_string());
        }
        if cache.lock_ttl_secs == 0 {
            return Err("cache lock_ttl_secs cannot be zero".to_string());
        }
        if cache.lock_key_prefix.is_empty() {
            return Err("cache lock_key_prefix cannot be empty".to_string());
        }
        if cache.max_lock_retries == 0 {
            return Err("cache max_lock_retries cannot be zero".to_string());
        }
        if !(0.0..=1.0).contains(&cache.ttl_jitter_ratio) {
            return Err("cache ttl_jitter_ratio must be between 0 and 1".to_string());
        }
        if cache.rebuild_workers == 0 || cache.rebuild_workers > 256 {
            return Err("cache rebuild_workers must be between 1 and 256".to_string());
        }
        if cache.rebuild_queue_capacity == 0 {
            return Err("cache rebuild_queue_capacity cannot be zero".to_string());
        }

        // ID生成器
        if self.id_generator.key_prefix.is_empty() {
            return Err("id_generator key_prefix cannot be empty".to_string());
        }
        if self.id_generator.epoch_secs < 0 {
            return Err("id_generator epoch_secs cannot be negative".to_string());
        }

        // 下单
        if self.order.lock_key_prefix.is_empty() {
            return Err("order lock_key_prefix cannot be empty".to_string());
        }
        if self.order.lock_ttl_secs == 0 {
            return Err("order lock_ttl_secs cannot be zero".to_string());
        }
        if self.order.id_tag.is_empty() {
            return Err("order id_tag cannot be empty".to_string());
        }

        if let Some(db) = &self.database {
            if db.url.is_empty() {
                return Err("database url cannot be empty".to_string());
            }
            if db.max_connections == 0 {
                return Err("database max_connections cannot be zero".to_string());
            }
        }

        Ok(())
    }
}
