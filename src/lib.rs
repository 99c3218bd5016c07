//! flashguard - Redis之上的缓存防护层
//!
//! 提供防穿透、防击穿（互斥锁与逻辑过期两种策略）的旁路缓存客户端，
//! 安全释放的分布式锁，可排序的分布式ID生成器，以及防超卖、一人一单的秒杀下单流程。

#![doc(html_root_url = "https://docs.rs/flashguard/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod id_worker;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod order;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used items
pub use backend::{KeyValueStore, MemoryStore, RedisStore};
pub use client::{CacheClient, LogicalEntry, ReadPolicy, NULL_MARKER};
pub use config::Config;
pub use error::{CacheError, Result};
pub use id_worker::IdGenerator;
pub use lock::{DistributedLock, LockGuard};
pub use manager::GuardManager;
pub use order::{
    MemoryOrderStore, OrderPlacementWorkflow, OrderStore, PlacementOutcome, RejectReason,
    UserContext,
};

/// flashguard 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
