//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于键值存储的分布式互斥锁。
//!
//! 获取锁使用 `SET key token NX PX ttl`，释放锁使用原子的比较并删除脚本，
//! 因此锁过期后被他人重新获取时，旧持有者的释放不会删除新持有者的锁。

use crate::backend::KeyValueStore;
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use futures::FutureExt;
use lazy_static::lazy_static;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

lazy_static! {
    /// 进程级唯一标识，与获取序号拼接成集群内唯一的持有者令牌
    static ref PROCESS_ID: String = uuid::Uuid::new_v4().simple().to_string();
}

static ACQUIRE_SEQ: AtomicU64 = AtomicU64::new(0);

/// 分布式锁
///
/// 只做单次尝试，从不阻塞或内部重试；退避与重试由调用方决定。
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl DistributedLock {
    /// 创建分布式锁
    ///
    /// # 参数
    ///
    /// * `store` - 键值存储
    /// * `key_prefix` - 锁键前缀，例如 `"lock:"`
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// 锁名对应的存储键
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    fn next_token() -> String {
        format!(
            "{}-{}",
            *PROCESS_ID,
            ACQUIRE_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// 尝试获取锁
    ///
    /// # 参数
    ///
    /// * `name` - 锁名（不含前缀）
    /// * `ttl` - 锁的过期时间，持有者崩溃时的兜底
    ///
    /// # 返回值
    ///
    /// 获取成功返回持有令牌的 [`LockGuard`]，锁被占用返回 `None`
    #[instrument(skip(self), level = "debug")]
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let key = self.key_for(name);
        let token = Self::next_token();
        if self.store.set_nx(&key, &token, ttl).await? {
            debug!("Lock acquired: key={}, token={}", key, token);
            GLOBAL_METRICS.record_lock("acquire", "ok");
            Ok(Some(LockGuard {
                store: self.store.clone(),
                key,
                token,
                released: false,
            }))
        } else {
            debug!("Lock contended: key={}", key);
            GLOBAL_METRICS.record_lock("acquire", "contended");
            Ok(None)
        }
    }

    /// 按令牌释放锁
    ///
    /// 仅当存储中的值仍等于 `token` 时删除。返回 false 表示锁已不属于该令牌。
    #[instrument(skip(self), level = "debug")]
    pub async fn release(&self, name: &str, token: &str) -> Result<bool> {
        release_key(self.store.as_ref(), &self.key_for(name), token).await
    }

    /// 在锁内执行 `body`
    ///
    /// 锁被占用时不执行 `body`，返回 `Ok(None)`。`body` 无论正常结束、返回错误
    /// 还是发生 panic，锁都会先被释放；panic 在释放后继续向上传播。
    /// 释放失败只记录日志，结果以 `body` 为准，残留的锁由 TTL 回收。
    pub async fn with_lock<F, T>(&self, name: &str, ttl: Duration, body: F) -> Result<Option<T>>
    where
        F: Future<Output = T> + Send,
    {
        let guard = match self.try_acquire(name, ttl).await? {
            Some(guard) => guard,
            None => return Ok(None),
        };

        let outcome = AssertUnwindSafe(body).catch_unwind().await;

        let key = guard.key.clone();
        if let Err(e) = guard.release().await {
            error!("Failed to release lock {}: {}", key, e);
        }

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

async fn release_key(store: &dyn KeyValueStore, key: &str, token: &str) -> Result<bool> {
    let released = store.compare_and_delete(key, token).await?;
    if released {
        debug!("Lock released: key={}", key);
        GLOBAL_METRICS.record_lock("release", "ok");
    } else {
        warn!(
            "Lock {} no longer held by token {}, left untouched",
            key, token
        );
        GLOBAL_METRICS.record_lock("release", "lost");
    }
    Ok(released)
}

/// 已持有的锁
///
/// 应显式调用 [`LockGuard::release`]。未释放就被丢弃时（例如所在 future 被取消），
/// 会在当前 tokio 运行时上补发一次释放。
#[must_use = "an unreleased lock is only reclaimed by its TTL"]
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// 存储键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 获取时写入的持有者令牌
    pub fn token(&self) -> &str {
        &self.token
    }

    /// 释放锁
    ///
    /// # 返回值
    ///
    /// 返回 true 表示删除了自己的锁；false 表示锁已过期或被他人持有，未做任何修改
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        release_key(self.store.as_ref(), &self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("LockGuard for {} dropped without release", self.key);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                if let Err(e) = release_key(store.as_ref(), &key, &token).await {
                    error!("Deferred release of lock {} failed: {}", key, e);
                }
            });
        }
    }
}
