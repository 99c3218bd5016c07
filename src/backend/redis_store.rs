//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的键值存储实现。

use super::redis_provider::{DefaultRedisProvider, RedisProvider};
use super::{KeyValueStore, COMPARE_AND_DELETE_SCRIPT};
use crate::config::{RedisMode, StoreConfig};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use redis::{aio::ConnectionManager, Client, FromRedisValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

lazy_static! {
    static ref UNLOCK_SCRIPT: redis::Script = redis::Script::new(COMPARE_AND_DELETE_SCRIPT);
}

/// Redis键值存储
///
/// 单机与哨兵模式共用 `ConnectionManager`，集群模式每次命令获取集群连接
#[derive(Clone)]
pub enum RedisStore {
    Standalone {
        client: Client,
        manager: ConnectionManager,
        command_timeout_ms: u64,
    },
    Cluster {
        client: redis::cluster::ClusterClient,
        command_timeout_ms: u64,
    },
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone { .. } => write!(f, "RedisStore::Standalone"),
            Self::Cluster { .. } => write!(f, "RedisStore::Cluster"),
        }
    }
}

fn px(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl RedisStore {
    /// 创建新的Redis存储
    #[instrument(skip(config), level = "info", name = "init_redis_store")]
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        Self::new_with_provider(config, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的Redis提供者创建存储
    ///
    /// # 参数
    ///
    /// * `config` - 存储配置
    /// * `provider` - Redis连接提供者
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &StoreConfig,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        debug!("Initializing RedisStore with mode: {:?}", config.mode);
        match config.mode {
            RedisMode::Standalone => {
                let (client, manager) = provider.get_standalone_client(config).await?;
                Ok(RedisStore::Standalone {
                    client,
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
            RedisMode::Sentinel => {
                let (client, manager) = provider.get_sentinel_client(config).await?;
                Ok(RedisStore::Standalone {
                    client,
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
            RedisMode::Cluster => {
                let client = provider.get_cluster_client(config).await?;
                Ok(RedisStore::Cluster {
                    client,
                    command_timeout_ms: config.command_timeout_ms,
                })
            }
        }
    }

    /// 获取命令超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        match self {
            RedisStore::Standalone {
                command_timeout_ms, ..
            } => *command_timeout_ms,
            RedisStore::Cluster {
                command_timeout_ms, ..
            } => *command_timeout_ms,
        }
    }

    /// 获取原始Redis客户端（集群模式不支持）
    pub fn get_raw_client(&self) -> Result<Client> {
        match self {
            RedisStore::Standalone { client, .. } => Ok(client.clone()),
            RedisStore::Cluster { .. } => Err(CacheError::Store(
                "get_raw_client is not supported in Cluster mode".to_string(),
            )),
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let limit = self.command_timeout_ms();
        match tokio::time::timeout(Duration::from_millis(limit), fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(CacheError::Timeout(format!(
                "{} timed out after {}ms",
                op, limit
            ))),
        }
    }

    async fn query<T>(&self, op: &str, cmd: redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        self.bounded(op, async {
            match self {
                RedisStore::Standalone { manager, .. } => {
                    let mut conn = manager.clone();
                    cmd.query_async(&mut conn).await
                }
                RedisStore::Cluster { client, .. } => {
                    let mut conn = client.get_async_connection().await?;
                    cmd.query_async(&mut conn).await
                }
            }
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", cmd).await
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(px(ttl));
        }
        self.query::<()>("SET", cmd).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("PX").arg(px(ttl));
        let result: Option<String> = self.query("SET NX", cmd).await?;
        debug!("SET NX result: key={}, success={}", key, result.is_some());
        Ok(result.is_some())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.query("DEL", cmd).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let removed: i64 = self
            .bounded("EVALSHA", async {
                let mut invocation = UNLOCK_SCRIPT.key(key);
                invocation.arg(expected);
                match self {
                    RedisStore::Standalone { manager, .. } => {
                        let mut conn = manager.clone();
                        invocation.invoke_async(&mut conn).await
                    }
                    RedisStore::Cluster { client, .. } => {
                        let mut conn = client.get_async_connection().await?;
                        invocation.invoke_async(&mut conn).await
                    }
                }
            })
            .await?;
        Ok(removed == 1)
    }

    #[instrument(skip(self), level = "debug")]
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query("INCR", cmd).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        let ms: i64 = self.query("PTTL", cmd).await?;
        if ms > 0 {
            Ok(Some(Duration::from_millis(ms as u64)))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn ping(&self) -> Result<()> {
        let response: String = self.query("PING", redis::cmd("PING")).await?;
        debug!("RedisStore ping: {}", response);
        Ok(())
    }
}
