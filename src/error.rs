//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存防护层的错误类型和处理机制。

use thiserror::Error;

/// 缓存防护层错误类型枚举
///
/// 仅描述基础设施层面的失败。业务拒绝（未开始、已结束、库存不足、重复下单、
/// 锁竞争）通过 [`crate::order::PlacementOutcome`] 以类型化结果返回，不属于错误。
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 键值存储操作失败
    #[error("Store operation failed: {0}")]
    Store(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 数据库错误
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Sea-ORM数据库错误
    #[error("Sea-ORM error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),

    /// Redis错误
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 互斥重建在重试预算内始终未拿到锁
    #[error("Lock contended: {0}")]
    LockContended(String),

    /// 等待被外部取消
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// 后台重建线程池拒绝任务
    #[error("Rebuild rejected: {0}")]
    RebuildRejected(String),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;
