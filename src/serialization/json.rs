//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了JSON序列化器的实现。

use super::Serializer;
use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// JSON序列化器
///
/// 基于serde_json，输出紧凑JSON文本
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    /// 序列化值为JSON字符串
    ///
    /// # 参数
    ///
    /// * `value` - 要序列化的值
    ///
    /// # 返回值
    ///
    /// 返回JSON文本；serde_json 对任何值都不会产生空字符串
    fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let text =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        if text.is_empty() {
            return Err(CacheError::Serialization(
                "record encoded to the reserved empty payload".to_string(),
            ));
        }
        Ok(text)
    }

    /// 从JSON字符串反序列化值
    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T> {
        serde_json::from_str(payload).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
