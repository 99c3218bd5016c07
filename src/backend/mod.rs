//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了键值存储接口及其Redis和内存实现。

pub mod memory;
pub mod redis_provider;
pub mod redis_store;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// 原子比较并删除脚本
///
/// 只有当前值与持有者令牌一致时才删除，返回删除的键数量
pub const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// 键值存储特征
///
/// 缓存防护层唯一依赖的共享可变资源。所有跨进程协调都表达为
/// 这里的原子操作：条件写入、比较删除和自增。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 读取字符串值，键不存在返回 `None`
    ///
    /// 空字符串是合法的存储状态（空值标记），与 `None` 含义不同。
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入字符串值
    ///
    /// # 参数
    ///
    /// * `key` - 键
    /// * `value` - 值
    /// * `ttl` - 物理过期时间，`None` 表示永不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// 仅当键不存在时写入（SET NX PX）
    ///
    /// # 返回值
    ///
    /// 写入成功返回 true
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 原子地比较并删除
    ///
    /// 当且仅当当前值等于 `expected` 时删除键，比较与删除不可被其他客户端插入。
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// 原子自增，键不存在时从0开始
    async fn incr(&self, key: &str) -> Result<i64>;

    /// 剩余生存时间，键不存在或无过期时间返回 `None`
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// 检查连接是否正常
    async fn ping(&self) -> Result<()>;
}
