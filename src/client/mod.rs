//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了通用的旁路缓存客户端。
//!
//! 提供三种读取策略：
//! - 缓存空值，防止缓存穿透
//! - 互斥锁重建，防止缓存击穿
//! - 逻辑过期后台重建，防止缓存击穿且读路径从不阻塞

pub mod rebuild;

use crate::backend::KeyValueStore;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::lock::DistributedLock;
use crate::metrics::GLOBAL_METRICS;
use crate::serialization::{JsonSerializer, Serializer};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub use rebuild::RebuildPool;

/// 空值标记
///
/// 表示"已查询过数据源，确认不存在"，与键不存在是两种不同的状态
pub const NULL_MARKER: &str = "";

/// 逻辑过期包装
///
/// 存储时不设置物理TTL，是否过期完全由 `expireTime` 与当前时间比较决定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogicalEntry<R> {
    pub data: R,
    #[serde(rename = "expireTime")]
    pub expire_time: DateTime<Utc>,
}

impl<R> LogicalEntry<R> {
    /// 逻辑上是否已过期
    pub fn is_expired(&self) -> bool {
        self.expire_time <= Utc::now()
    }
}

/// 读取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// 缓存空值防穿透
    PassThrough,
    /// 互斥锁重建防击穿
    Mutex,
    /// 逻辑过期防击穿，要求缓存已预热
    LogicalExpire,
}

impl ReadPolicy {
    fn label(&self) -> &'static str {
        match self {
            ReadPolicy::PassThrough => "pass_through",
            ReadPolicy::Mutex => "mutex",
            ReadPolicy::LogicalExpire => "logical",
        }
    }
}

enum Lookup<R> {
    Hit(R),
    Null,
    Miss,
}

/// 旁路缓存客户端
///
/// 克隆开销很小，所有克隆共享同一个存储和重建线程池。
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    serializer: JsonSerializer,
    config: CacheConfig,
    rebuild_pool: RebuildPool,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("config", &self.config)
            .field("rebuild_pool", &self.rebuild_pool)
            .finish()
    }
}

impl CacheClient {
    /// 创建缓存客户端并启动重建线程池，必须在 tokio 运行时内调用
    ///
    /// # 参数
    ///
    /// * `store` - 键值存储
    /// * `config` - 缓存策略配置
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let lock = DistributedLock::new(store.clone(), config.lock_key_prefix.clone());
        let rebuild_pool = RebuildPool::new(config.rebuild_workers, config.rebuild_queue_capacity);
        Self {
            store,
            lock,
            serializer: JsonSerializer::new(),
            config,
            rebuild_pool,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// 重建锁使用的锁名，按完整缓存键区分，不同前缀下的相同id互不干扰
    pub fn rebuild_lock_name(key: &str) -> String {
        key.to_string()
    }

    /// 停止后台重建线程池
    pub fn shutdown(&self) {
        self.rebuild_pool.shutdown();
    }

    fn jittered_ttl(&self, ttl: Duration) -> Duration {
        let max_jitter_ms = (ttl.as_millis() as f64 * self.config.ttl_jitter_ratio) as u64;
        if max_jitter_ms == 0 {
            return ttl;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
        ttl + Duration::from_millis(jitter)
    }

    /// 序列化后写入，并设置物理TTL
    #[instrument(skip(self, value), level = "debug")]
    pub async fn write<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = self.serializer.encode(value)?;
        self.store.set(key, &payload, Some(ttl)).await
    }

    /// 以逻辑过期方式写入，不设置物理TTL
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    /// * `value` - 记录
    /// * `logical_ttl` - 逻辑有效期，`expireTime = now + logical_ttl`
    #[instrument(skip(self, value), level = "debug")]
    pub async fn write_logical<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> Result<()> {
        let ttl = chrono::Duration::from_std(logical_ttl)
            .map_err(|e| CacheError::ConfigError(format!("logical ttl out of range: {}", e)))?;
        let entry = LogicalEntry {
            data: value,
            expire_time: Utc::now() + ttl,
        };
        let payload = self.serializer.encode(&entry)?;
        self.store.set(key, &payload, None).await
    }

    /// 删除缓存键
    #[instrument(skip(self, id), level = "debug", fields(id = %id))]
    pub async fn invalidate<ID: Display>(&self, key_prefix: &str, id: &ID) -> Result<()> {
        self.store.delete(&format!("{}{}", key_prefix, id)).await?;
        Ok(())
    }

    /// 先更新数据源，成功后再删除缓存
    ///
    /// # 参数
    ///
    /// * `update` - 数据源更新，返回是否有记录被更新
    ///
    /// # 返回值
    ///
    /// 返回数据源更新的结果；更新失败时不触碰缓存
    pub async fn update_through<ID, Fut>(&self, key_prefix: &str, id: &ID, update: Fut) -> Result<bool>
    where
        ID: Display,
        Fut: Future<Output = Result<bool>>,
    {
        let updated = update.await?;
        if updated {
            self.invalidate(key_prefix, id).await?;
            debug!("Invalidated {}{} after update", key_prefix, id);
        }
        Ok(updated)
    }

    async fn lookup<R: DeserializeOwned>(&self, key: &str) -> Result<Lookup<R>> {
        match self.store.get(key).await? {
            None => Ok(Lookup::Miss),
            Some(payload) if payload == NULL_MARKER => Ok(Lookup::Null),
            Some(payload) => match self.serializer.decode(&payload) {
                Ok(record) => Ok(Lookup::Hit(record)),
                Err(e) => {
                    warn!("Corrupt cache payload at {}, treating as miss: {}", key, e);
                    Ok(Lookup::Miss)
                }
            },
        }
    }

    async fn populate<R: Serialize + Sync>(
        &self,
        key: &str,
        record: Option<&R>,
        ttl: Duration,
    ) -> Result<()> {
        match record {
            Some(record) => self.write(key, record, self.jittered_ttl(ttl)).await,
            None => {
                self.store
                    .set(key, NULL_MARKER, Some(self.config.null_ttl()))
                    .await
            }
        }
    }

    /// 缓存空值防穿透查询
    ///
    /// 1. 命中非空载荷直接返回
    /// 2. 命中空值标记返回 `None`，不访问数据源
    /// 3. 键不存在时回源；数据源无记录写入空值标记，有记录按 `ttl` 加随机抖动写入
    ///
    /// # 参数
    ///
    /// * `key_prefix` - 键前缀
    /// * `id` - 记录id
    /// * `fallback` - 数据源查询
    /// * `ttl` - 记录的物理TTL
    #[instrument(skip(self, id, fallback), level = "debug", fields(id = %id))]
    pub async fn query_with_pass_through<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Sync,
        ID: Display,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<R>>>,
    {
        let key = format!("{}{}", key_prefix, id);
        match self.lookup(&key).await? {
            Lookup::Hit(record) => {
                GLOBAL_METRICS.record_cache(key_prefix, "pass_through", "hit");
                return Ok(Some(record));
            }
            Lookup::Null => {
                GLOBAL_METRICS.record_cache(key_prefix, "pass_through", "null_hit");
                return Ok(None);
            }
            Lookup::Miss => {}
        }

        GLOBAL_METRICS.record_cache(key_prefix, "pass_through", "miss");
        let record = fallback(id).await?;
        self.populate(&key, record.as_ref(), ttl).await?;
        Ok(record)
    }

    /// 互斥锁防击穿查询
    ///
    /// 键不存在时竞争重建锁，同一时刻至多一个调用方回源。
    /// 竞争失败的调用方等待 `retry_backoff_ms` 后从头重试，最多 `max_lock_retries` 次。
    pub async fn query_with_mutex<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Send + Sync,
        ID: Display + Clone + Send + Sync,
        F: Fn(ID) -> Fut + Sync,
        Fut: Future<Output = Result<Option<R>>> + Send,
    {
        self.query_with_mutex_cancellable(key_prefix, id, fallback, ttl, None)
            .await
    }

    /// 可取消的互斥锁防击穿查询
    ///
    /// `cancel` 被触发时，正在退避等待的调用返回 [`CacheError::Cancelled`]。
    #[instrument(skip(self, id, fallback, cancel), level = "debug", fields(id = %id))]
    pub async fn query_with_mutex_cancellable<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        fallback: F,
        ttl: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Send + Sync,
        ID: Display + Clone + Send + Sync,
        F: Fn(ID) -> Fut + Sync,
        Fut: Future<Output = Result<Option<R>>> + Send,
    {
        let key = format!("{}{}", key_prefix, id);
        let lock_name = Self::rebuild_lock_name(&key);
        let max_retries = self.config.max_lock_retries;

        for attempt in 0..=max_retries {
            match self.lookup(&key).await? {
                Lookup::Hit(record) => {
                    GLOBAL_METRICS.record_cache(key_prefix, "mutex", "hit");
                    return Ok(Some(record));
                }
                Lookup::Null => {
                    GLOBAL_METRICS.record_cache(key_prefix, "mutex", "null_hit");
                    return Ok(None);
                }
                Lookup::Miss => {}
            }

            let rebuilt = self
                .lock
                .with_lock(
                    &lock_name,
                    self.config.lock_ttl(),
                    self.rebuild_under_lock(key_prefix, &key, id.clone(), &fallback, ttl),
                )
                .await?;
            if let Some(outcome) = rebuilt {
                return outcome;
            }

            if attempt == max_retries {
                break;
            }
            debug!(
                "Rebuild lock {} contended, retry {}/{}",
                lock_name,
                attempt + 1,
                max_retries
            );
            let backoff = tokio::time::sleep(self.config.retry_backoff());
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(CacheError::Cancelled(format!("waiting for rebuild of {}", key)));
                        }
                        _ = backoff => {}
                    }
                }
                None => backoff.await,
            }
        }

        warn!("Gave up waiting for rebuild of {} after {} retries", key, max_retries);
        Err(CacheError::LockContended(format!(
            "rebuild lock for {} still held after {} retries",
            key, max_retries
        )))
    }

    async fn rebuild_under_lock<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        key: &str,
        id: ID,
        fallback: &F,
        ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Sync,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<R>>>,
    {
        // 双重检查：等待锁期间其他持有者可能已经完成重建
        match self.lookup(key).await? {
            Lookup::Hit(record) => return Ok(Some(record)),
            Lookup::Null => return Ok(None),
            Lookup::Miss => {}
        }

        GLOBAL_METRICS.record_cache(key_prefix, "mutex", "rebuild");
        let record = fallback(id).await?;
        self.populate(key, record.as_ref(), ttl).await?;
        Ok(record)
    }

    /// 逻辑过期防击穿查询
    ///
    /// 键不存在直接返回 `None`，此策略要求缓存已预热。逻辑过期时抢占重建锁，
    /// 抢到则把回源重建交给后台线程池；无论是否抢到，都立即返回旧数据。
    ///
    /// # 参数
    ///
    /// * `logical_ttl` - 重建后的逻辑有效期
    #[instrument(skip(self, id, fallback), level = "debug", fields(id = %id))]
    pub async fn query_with_logical_expire<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        fallback: F,
        logical_ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Clone + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<R>>> + Send + 'static,
    {
        let key = format!("{}{}", key_prefix, id);
        let payload = match self.store.get(&key).await? {
            Some(payload) if payload != NULL_MARKER => payload,
            _ => {
                GLOBAL_METRICS.record_cache(key_prefix, "logical", "miss");
                return Ok(None);
            }
        };

        let entry: LogicalEntry<R> = match self.serializer.decode(&payload) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Corrupt logical entry at {}, reloading from source: {}", key, e);
                return self
                    .recover_logical(key_prefix, &key, id, &fallback, logical_ttl)
                    .await;
            }
        };

        if !entry.is_expired() {
            GLOBAL_METRICS.record_cache(key_prefix, "logical", "hit");
            return Ok(Some(entry.data));
        }

        GLOBAL_METRICS.record_cache(key_prefix, "logical", "stale");
        let lock_name = Self::rebuild_lock_name(&key);
        let Some(guard) = self
            .lock
            .try_acquire(&lock_name, self.config.lock_ttl())
            .await?
        else {
            debug!("Rebuild of {} already in progress, serving stale data", key);
            return Ok(Some(entry.data));
        };

        // 双重检查：其他持有者可能刚刚完成重建
        if let Some(fresh) = self.fresh_logical::<R>(&key).await {
            if let Err(e) = guard.release().await {
                error!("Failed to release rebuild lock {}: {}", lock_name, e);
            }
            return Ok(Some(fresh));
        }

        GLOBAL_METRICS.record_cache(key_prefix, "logical", "rebuild");
        let client = self.clone();
        let job_key = key.clone();
        let submitted = self.rebuild_pool.submit(async move {
            if let Err(e) = client
                .reload_logical(&job_key, id, &fallback, logical_ttl)
                .await
            {
                error!("Background rebuild of {} failed: {}", job_key, e);
            }
            if let Err(e) = guard.release().await {
                error!("Failed to release rebuild lock for {}: {}", job_key, e);
            }
        });
        // 被拒绝的任务随其持有的锁一起被丢弃，锁由 LockGuard 的 Drop 补发释放
        if let Err(e) = submitted {
            warn!("Rebuild of {} not scheduled: {}", key, e);
        }

        Ok(Some(entry.data))
    }

    /// 载荷无法解析时在重建锁下同步重载
    ///
    /// 同一时刻至多一个调用方回源；竞争失败的调用方退避后重读，
    /// 读到可解析的包装即返回其中的数据。
    async fn recover_logical<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        key: &str,
        id: ID,
        fallback: &F,
        logical_ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Send + Sync,
        ID: Clone + Send + Sync,
        F: Fn(ID) -> Fut + Sync,
        Fut: Future<Output = Result<Option<R>>> + Send,
    {
        let lock_name = Self::rebuild_lock_name(key);
        let max_retries = self.config.max_lock_retries;

        for attempt in 0..=max_retries {
            let reloaded = self
                .lock
                .with_lock(&lock_name, self.config.lock_ttl(), async {
                    // 双重检查：上一个持有者可能已经写回了有效包装
                    if let Some(fresh) = self.fresh_logical::<R>(key).await {
                        return Ok(Some(fresh));
                    }
                    GLOBAL_METRICS.record_cache(key_prefix, "logical", "rebuild");
                    self.reload_logical(key, id.clone(), fallback, logical_ttl)
                        .await
                })
                .await?;
            if let Some(outcome) = reloaded {
                return outcome;
            }

            if attempt == max_retries {
                break;
            }
            tokio::time::sleep(self.config.retry_backoff()).await;

            match self.store.get(key).await? {
                None => return Ok(None),
                Some(payload) if payload == NULL_MARKER => return Ok(None),
                Some(payload) => {
                    if let Ok(entry) = self.serializer.decode::<LogicalEntry<R>>(&payload) {
                        return Ok(Some(entry.data));
                    }
                }
            }
        }

        warn!("Gave up reloading corrupt entry {} after {} retries", key, max_retries);
        Err(CacheError::LockContended(format!(
            "rebuild lock for {} still held after {} retries",
            key, max_retries
        )))
    }

    async fn fresh_logical<R: DeserializeOwned>(&self, key: &str) -> Option<R> {
        let payload = self.store.get(key).await.ok().flatten()?;
        let entry: LogicalEntry<R> = self.serializer.decode(&payload).ok()?;
        (!entry.is_expired()).then_some(entry.data)
    }

    async fn reload_logical<R, ID, F, Fut>(
        &self,
        key: &str,
        id: ID,
        fallback: &F,
        logical_ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + Sync,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<R>>>,
    {
        match fallback(id).await? {
            Some(record) => {
                self.write_logical(key, &record, logical_ttl).await?;
                Ok(Some(record))
            }
            None => {
                // 数据源已删除该记录，移除缓存让后续读取返回 None
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// 为逻辑过期策略预热单个键
    ///
    /// # 返回值
    ///
    /// 数据源存在该记录并已写入时返回 true
    #[instrument(skip(self, id, fallback), level = "info", fields(id = %id))]
    pub async fn warm_logical<R, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        fallback: F,
        logical_ttl: Duration,
    ) -> Result<bool>
    where
        R: Serialize + Sync,
        ID: Display,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<R>>>,
    {
        let key = format!("{}{}", key_prefix, id);
        match fallback(id).await? {
            Some(record) => {
                self.write_logical(&key, &record, logical_ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 按策略查询
    ///
    /// 策略是配置项而非代码分支，调用方可以按业务热度选择
    pub async fn query<R, ID, F, Fut>(
        &self,
        policy: ReadPolicy,
        key_prefix: &str,
        id: ID,
        fallback: F,
        ttl: Duration,
    ) -> Result<Option<R>>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Clone + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<R>>> + Send + 'static,
    {
        debug!("Querying {}{} with policy {}", key_prefix, id, policy.label());
        match policy {
            ReadPolicy::PassThrough => {
                self.query_with_pass_through(key_prefix, id, fallback, ttl)
                    .await
            }
            ReadPolicy::Mutex => self.query_with_mutex(key_prefix, id, fallback, ttl).await,
            ReadPolicy::LogicalExpire => {
                self.query_with_logical_expire(key_prefix, id, fallback, ttl)
                    .await
            }
        }
    }
}
