//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存载荷的序列化机制。

pub mod json;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub use json::JsonSerializer;

/// 序列化器特征
///
/// 缓存存储的是字符串，空字符串保留给空值标记，
/// 实现必须保证任何记录都不会编码为空字符串。
pub trait Serializer: Send + Sync {
    /// 序列化值为字符串载荷
    fn encode<T: Serialize>(&self, value: &T) -> Result<String>;

    /// 从字符串载荷反序列化值
    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T>;
}
