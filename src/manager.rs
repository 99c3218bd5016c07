//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了防护层管理器，负责按配置组装存储、缓存客户端、锁、ID生成器和下单流程。

use crate::backend::{KeyValueStore, RedisStore};
use crate::client::CacheClient;
use crate::config::Config;
use crate::database::{self, SeaOrmOrderStore};
use crate::error::{CacheError, Result};
use crate::id_worker::IdGenerator;
use crate::lock::DistributedLock;
use crate::order::{OrderPlacementWorkflow, OrderStore};
use std::sync::Arc;
use tracing::{info, instrument};

/// 防护层管理器
///
/// 所有组件共享同一个键值存储
#[derive(Clone)]
pub struct GuardManager {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    cache: CacheClient,
    lock: DistributedLock,
    ids: IdGenerator,
    orders: Option<OrderPlacementWorkflow>,
}

impl std::fmt::Debug for GuardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardManager")
            .field("cache", &self.cache)
            .field("ids", &self.ids)
            .field("orders", &self.orders)
            .finish()
    }
}

impl GuardManager {
    /// 按配置连接Redis和（可选的）数据库并初始化所有组件
    ///
    /// # 参数
    ///
    /// * `config` - 防护层配置
    ///
    /// # 返回值
    ///
    /// 配置非法、Redis或数据库不可达时返回错误
    #[instrument(skip(config), level = "info", fields(mode = ?config.store.mode))]
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::new(&config.store).await?);
        let orders: Option<Arc<dyn OrderStore>> = match &config.database {
            Some(db_config) => {
                let db = database::connect(db_config).await?;
                database::create_schema(&db).await?;
                Some(Arc::new(SeaOrmOrderStore::new(db)))
            }
            None => None,
        };

        Self::with_store(config, store, orders)
    }

    /// 使用已有的存储和订单数据源初始化，必须在 tokio 运行时内调用
    pub fn with_store(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        orders: Option<Arc<dyn OrderStore>>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let cache = CacheClient::new(store.clone(), config.cache.clone());
        let lock = DistributedLock::new(store.clone(), config.cache.lock_key_prefix.clone());
        let ids = IdGenerator::new(store.clone(), &config.id_generator);
        let orders = orders.map(|orders| {
            OrderPlacementWorkflow::new(orders, store.clone(), ids.clone(), config.order.clone())
        });

        info!(
            "GuardManager ready (order placement {})",
            if orders.is_some() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            config,
            store,
            cache,
            lock,
            ids,
            orders,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// 下单流程，未配置数据库时返回错误
    pub fn orders(&self) -> Result<&OrderPlacementWorkflow> {
        self.orders.as_ref().ok_or_else(|| {
            CacheError::ConfigError("order placement requires a [database] section".to_string())
        })
    }

    /// 停止后台重建任务
    pub fn shutdown(&self) {
        self.cache.shutdown();
        info!("GuardManager shut down");
    }
}
