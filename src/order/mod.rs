//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀下单流程。
//!
//! 流程组合了分布式锁、ID生成器和数据源上的条件扣减库存：
//! 时间窗口检查 → 库存快速检查 → 获取用户级锁 → 一人一单检查 → 条件扣减 → 写入订单。

pub mod memory;

use crate::backend::KeyValueStore;
use crate::config::OrderConfig;
use crate::error::Result;
use crate::id_worker::IdGenerator;
use crate::lock::DistributedLock;
use crate::metrics::GLOBAL_METRICS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub use memory::MemoryOrderStore;

/// 秒杀券库存记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: i64,
    pub stock: i32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// 订单记录，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherOrder {
    pub id: i64,
    pub voucher_id: i64,
    pub user_id: i64,
    pub create_time: DateTime<Utc>,
}

/// 当前请求的用户身份，显式传入而不是从全局状态读取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserContext {
    pub user_id: i64,
}

impl UserContext {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }
}

/// 下单被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// 秒杀尚未开始
    NotStarted,
    /// 秒杀已经结束
    Ended,
    /// 库存不足
    OutOfStock,
    /// 同一用户的请求正在处理，稍后重试
    LockContended,
    /// 该用户已下过单
    DuplicateOrder,
    /// 秒杀券不存在
    NotFound,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotStarted => "not_started",
            RejectReason::Ended => "ended",
            RejectReason::OutOfStock => "out_of_stock",
            RejectReason::LockContended => "lock_contended",
            RejectReason::DuplicateOrder => "duplicate_order",
            RejectReason::NotFound => "not_found",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            RejectReason::NotStarted => "seckill has not started",
            RejectReason::Ended => "seckill has ended",
            RejectReason::OutOfStock => "out of stock",
            RejectReason::LockContended => "request in progress, try again later",
            RejectReason::DuplicateOrder => "user already ordered this voucher",
            RejectReason::NotFound => "voucher not found",
        };
        f.write_str(message)
    }
}

/// 下单结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Granted { order_id: i64 },
    Rejected(RejectReason),
}

impl PlacementOutcome {
    pub fn order_id(&self) -> Option<i64> {
        match self {
            PlacementOutcome::Granted { order_id } => Some(*order_id),
            PlacementOutcome::Rejected(_) => None,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, PlacementOutcome::Granted { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            PlacementOutcome::Granted { .. } => "granted",
            PlacementOutcome::Rejected(reason) => reason.as_str(),
        }
    }
}

/// 订单数据源
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 读取秒杀券
    async fn find_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>>;

    /// 开启一个工作单元（事务）
    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>>;
}

/// 下单工作单元
///
/// 扣减库存与写入订单必须在同一单元内提交或回滚，由调用方根据结果决定。
#[async_trait]
pub trait OrderUnitOfWork: Send {
    /// 该用户对该券的订单数量
    async fn count_orders(&mut self, user_id: i64, voucher_id: i64) -> Result<u64>;

    /// 条件扣减库存
    ///
    /// 等价于 `UPDATE ... SET stock = stock - 1 WHERE voucher_id = ? AND stock > 0`，
    /// 返回受影响行数；0 是唯一权威的库存不足信号。
    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<u64>;

    /// 写入订单
    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// 秒杀下单流程
#[derive(Clone)]
pub struct OrderPlacementWorkflow {
    orders: Arc<dyn OrderStore>,
    lock: DistributedLock,
    ids: IdGenerator,
    config: OrderConfig,
}

impl fmt::Debug for OrderPlacementWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderPlacementWorkflow")
            .field("lock", &self.lock)
            .field("ids", &self.ids)
            .field("config", &self.config)
            .finish()
    }
}

impl OrderPlacementWorkflow {
    /// 创建下单流程
    ///
    /// # 参数
    ///
    /// * `orders` - 订单数据源
    /// * `kv` - 用于用户级锁的键值存储
    /// * `ids` - 订单ID生成器
    /// * `config` - 下单配置
    pub fn new(
        orders: Arc<dyn OrderStore>,
        kv: Arc<dyn KeyValueStore>,
        ids: IdGenerator,
        config: OrderConfig,
    ) -> Self {
        let lock = DistributedLock::new(kv, config.lock_key_prefix.clone());
        Self {
            orders,
            lock,
            ids,
            config,
        }
    }

    /// 以当前时间下单
    pub async fn place(&self, user: &UserContext, voucher_id: i64) -> Result<PlacementOutcome> {
        self.place_at(user, voucher_id, Utc::now()).await
    }

    /// 以指定时间下单
    ///
    /// # 返回值
    ///
    /// 业务拒绝通过 [`PlacementOutcome::Rejected`] 返回；只有存储或数据库故障才返回错误。
    /// 无论哪种结果，返回时用户级锁都已释放。
    #[instrument(skip(self), level = "debug", fields(user_id = user.user_id))]
    pub async fn place_at(
        &self,
        user: &UserContext,
        voucher_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PlacementOutcome> {
        let outcome = self.try_place(user, voucher_id, now).await?;
        GLOBAL_METRICS.record_placement(outcome.label());
        match outcome {
            PlacementOutcome::Granted { order_id } => {
                info!(
                    "Order {} granted: user={}, voucher={}",
                    order_id, user.user_id, voucher_id
                );
            }
            PlacementOutcome::Rejected(reason) => {
                debug!(
                    "Order rejected: user={}, voucher={}, reason={}",
                    user.user_id, voucher_id, reason
                );
            }
        }
        Ok(outcome)
    }

    async fn try_place(
        &self,
        user: &UserContext,
        voucher_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PlacementOutcome> {
        let Some(voucher) = self.orders.find_voucher(voucher_id).await? else {
            return Ok(PlacementOutcome::Rejected(RejectReason::NotFound));
        };
        if now < voucher.begin_time {
            return Ok(PlacementOutcome::Rejected(RejectReason::NotStarted));
        }
        if now > voucher.end_time {
            return Ok(PlacementOutcome::Rejected(RejectReason::Ended));
        }
        // 快速失败，权威检查是条件扣减
        if voucher.stock < 1 {
            return Ok(PlacementOutcome::Rejected(RejectReason::OutOfStock));
        }

        let lock_name = user.user_id.to_string();
        let locked = self
            .lock
            .with_lock(
                &lock_name,
                self.config.lock_ttl(),
                self.create_order(user, voucher_id, now),
            )
            .await?;
        match locked {
            Some(outcome) => outcome,
            None => Ok(PlacementOutcome::Rejected(RejectReason::LockContended)),
        }
    }

    /// 持有用户级锁时执行的事务部分
    async fn create_order(
        &self,
        user: &UserContext,
        voucher_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PlacementOutcome> {
        let mut uow = self.orders.begin().await?;
        match self
            .apply_order(uow.as_mut(), user, voucher_id, now)
            .await
        {
            Ok(PlacementOutcome::Granted { order_id }) => {
                uow.commit().await?;
                Ok(PlacementOutcome::Granted { order_id })
            }
            Ok(rejected) => {
                uow.rollback().await?;
                Ok(rejected)
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(
                        "Rollback failed for user={}, voucher={}: {}",
                        user.user_id, voucher_id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_order(
        &self,
        uow: &mut dyn OrderUnitOfWork,
        user: &UserContext,
        voucher_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PlacementOutcome> {
        if uow.count_orders(user.user_id, voucher_id).await? > 0 {
            return Ok(PlacementOutcome::Rejected(RejectReason::DuplicateOrder));
        }
        if uow.decrement_stock(voucher_id).await? == 0 {
            return Ok(PlacementOutcome::Rejected(RejectReason::OutOfStock));
        }

        let order_id = self.ids.next_at(&self.config.id_tag, now).await?;
        uow.insert_order(&VoucherOrder {
            id: order_id,
            voucher_id,
            user_id: user.user_id,
            create_time: now,
        })
        .await?;
        Ok(PlacementOutcome::Granted { order_id })
    }
}
