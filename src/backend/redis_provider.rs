//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis连接提供者接口和默认实现。

use crate::{
    config::StoreConfig,
    error::{CacheError, Result},
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};

#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &StoreConfig)
        -> Result<(Client, ConnectionManager)>;
    async fn get_cluster_client(&self, config: &StoreConfig)
        -> Result<redis::cluster::ClusterClient>;
    async fn get_sentinel_client(&self, config: &StoreConfig)
        -> Result<(Client, ConnectionManager)>;
}

pub struct DefaultRedisProvider;

impl DefaultRedisProvider {
    /// 单机模式的连接地址
    ///
    /// 配置了 `password` 且地址中没有凭据时，把密码写入地址；地址自带的凭据优先。
    fn connection_url(config: &StoreConfig) -> String {
        let raw = config.connection_string.expose_secret();
        let mut url = if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        };

        if let Some(password) = &config.password {
            if let Some(scheme_end) = url.find("://") {
                let authority_start = scheme_end + 3;
                let authority_end = url[authority_start..]
                    .find('/')
                    .map(|i| authority_start + i)
                    .unwrap_or(url.len());
                if !url[authority_start..authority_end].contains('@') {
                    url.insert_str(
                        authority_start,
                        &format!(":{}@", password.expose_secret()),
                    );
                }
            }
        }
        url
    }
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(
        &self,
        config: &StoreConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let url = Self::connection_url(config);
        let client = Client::open(url.as_str())?;
        let manager = timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            CacheError::Timeout(format!(
                "Connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;
        Ok((client, manager))
    }

    async fn get_cluster_client(
        &self,
        config: &StoreConfig,
    ) -> Result<redis::cluster::ClusterClient> {
        let cluster_config = config.cluster.as_ref().ok_or_else(|| {
            CacheError::ConfigError("Cluster configuration is missing".to_string())
        })?;

        let mut builder = redis::cluster::ClusterClient::builder(cluster_config.nodes.clone());
        if let Some(password) = &config.password {
            builder = builder.password(password.expose_secret().to_string());
        }
        let client = builder.build()?;

        // 建立一次连接以尽早暴露配置错误
        timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_async_connection(),
        )
        .await
        .map_err(|_| {
            CacheError::Timeout(format!(
                "Cluster connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;
        Ok(client)
    }

    async fn get_sentinel_client(
        &self,
        config: &StoreConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let sentinel_config = config.sentinel.as_ref().ok_or_else(|| {
            CacheError::ConfigError("Sentinel configuration is missing".to_string())
        })?;

        tracing::info!("Initializing Sentinel client with automatic failover support");

        // redis+sentinel://[:password@]host:port[,host:port]/service_name
        let mut url = "redis+sentinel://".to_string();
        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }

        let nodes: Vec<String> = sentinel_config
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();
        if nodes.is_empty() {
            return Err(CacheError::ConfigError(
                "No sentinel nodes provided".to_string(),
            ));
        }
        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel_config.master_name);

        let client = Client::open(url)?;
        let manager = timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            CacheError::Timeout(format!(
                "Sentinel connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;

        Ok((client, manager))
    }
}
