//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内键值存储，用于单机部署、测试与基准。

use super::KeyValueStore;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
struct StoredValue {
    value: String,
    expire_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expire_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.expire_at, Some(at) if Instant::now() >= at)
    }
}

/// 内存键值存储
///
/// 基于 `DashMap`，单键操作在分片锁内完成，因此条件写入、比较删除和自增
/// 与Redis一样是原子的。过期键在访问时惰性清除。
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空所有键
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    #[instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // 过期键惰性删除，避免与并发写入竞争时误删新值
        self.entries.remove_if(key, |_, v| v.is_expired());
        Ok(None)
    }

    #[instrument(skip(self, value), level = "trace")]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value.to_string(), ttl));
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value.to_string(), Some(ttl)));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value.to_string(), Some(ttl)));
                true
            }
        };
        debug!("MemoryStore set_nx: key={}, success={}", key, acquired);
        Ok(acquired)
    }

    #[instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| !v.is_expired())
            .unwrap_or(false))
    }

    #[instrument(skip(self), level = "trace")]
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, v| !v.is_expired() && v.value == expected)
            .is_some())
    }

    #[instrument(skip(self), level = "trace")]
    async fn incr(&self, key: &str) -> Result<i64> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new("1".to_string(), None));
                    return Ok(1);
                }
                let current: i64 = occupied.get().value.parse().map_err(|_| {
                    CacheError::Store(format!(
                        "value at '{}' is not an integer or out of range",
                        key
                    ))
                })?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| CacheError::Store(format!("increment overflow at '{}'", key)))?;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new("1".to_string(), None));
                Ok(1)
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.entries.get(key).and_then(|v| match v.expire_at {
            Some(at) => at.checked_duration_since(Instant::now()),
            None => None,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
