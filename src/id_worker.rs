//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于键值存储自增计数器的全局唯一ID生成器。
//!
//! ID 布局：高位为自定义纪元以来的秒数，低32位为按业务标签和日期划分的序号。

use crate::backend::KeyValueStore;
use crate::config::IdGeneratorConfig;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};

/// 序号占用的位数
pub const SEQUENCE_BITS: u32 = 32;

const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// 将时间戳与序号组合为ID
pub fn compose(timestamp: i64, sequence: i64) -> i64 {
    (timestamp << SEQUENCE_BITS) | sequence
}

/// ID中的时间戳部分（纪元以来的秒数）
pub fn timestamp_of(id: i64) -> i64 {
    id >> SEQUENCE_BITS
}

/// ID中的序号部分
pub fn sequence_of(id: i64) -> i64 {
    id & SEQUENCE_MASK
}

/// 分布式ID生成器
#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn KeyValueStore>,
    epoch_secs: i64,
    key_prefix: String,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("epoch_secs", &self.epoch_secs)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl IdGenerator {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &IdGeneratorConfig) -> Self {
        Self {
            store,
            epoch_secs: config.epoch_secs,
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// 某业务标签在某天的计数器键，例如 `icr:order:2025:06:01`
    pub fn counter_key(&self, tag: &str, now: DateTime<Utc>) -> String {
        format!("{}{}:{}", self.key_prefix, tag, now.format("%Y:%m:%d"))
    }

    /// 生成下一个ID
    ///
    /// # 参数
    ///
    /// * `tag` - 业务标签，不同标签的序号互不干扰
    pub async fn next(&self, tag: &str) -> Result<i64> {
        self.next_at(tag, Utc::now()).await
    }

    /// 以指定时间生成下一个ID
    ///
    /// # 返回值
    ///
    /// 时间早于纪元时返回错误
    #[instrument(skip(self), level = "debug")]
    pub async fn next_at(&self, tag: &str, now: DateTime<Utc>) -> Result<i64> {
        let timestamp = now.timestamp() - self.epoch_secs;
        if timestamp < 0 {
            return Err(CacheError::ConfigError(format!(
                "clock {} is before the id epoch {}",
                now, self.epoch_secs
            )));
        }

        let sequence = self.store.incr(&self.counter_key(tag, now)).await?;
        if sequence > SEQUENCE_MASK {
            warn!(
                "Daily id sequence for '{}' exceeded {} bits: {}",
                tag, SEQUENCE_BITS, sequence
            );
        }
        Ok(compose(timestamp, sequence))
    }
}
