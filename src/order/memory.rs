//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内订单数据源。

use super::{OrderStore, OrderUnitOfWork, SeckillVoucher, VoucherOrder};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 内存订单数据源
///
/// 条件扣减在 `DashMap` 分片锁内完成，与数据库的 `stock > 0` 条件更新一样原子。
/// 工作单元的写入立即可见，回滚时按撤销日志恢复。
#[derive(Clone, Debug, Default)]
pub struct MemoryOrderStore {
    vouchers: Arc<DashMap<i64, SeckillVoucher>>,
    orders: Arc<DashMap<i64, VoucherOrder>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增或覆盖秒杀券
    pub fn put_voucher(&self, voucher: SeckillVoucher) {
        self.vouchers.insert(voucher.voucher_id, voucher);
    }

    /// 当前库存
    pub fn stock(&self, voucher_id: i64) -> Option<i32> {
        self.vouchers.get(&voucher_id).map(|v| v.stock)
    }

    /// 已写入的订单数
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// 某用户对某券的订单
    pub fn orders_of(&self, user_id: i64, voucher_id: i64) -> Vec<VoucherOrder> {
        self.orders
            .iter()
            .filter(|o| o.user_id == user_id && o.voucher_id == voucher_id)
            .map(|o| o.value().clone())
            .collect()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>> {
        Ok(self.vouchers.get(&voucher_id).map(|v| v.value().clone()))
    }

    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            undo: Vec::new(),
            finished: false,
        }))
    }
}

enum Undo {
    RestoreStock(i64),
    RemoveOrder(i64),
}

struct MemoryUnitOfWork {
    store: MemoryOrderStore,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn revert(&mut self) {
        for step in self.undo.drain(..).rev() {
            match step {
                Undo::RestoreStock(voucher_id) => {
                    if let Some(mut voucher) = self.store.vouchers.get_mut(&voucher_id) {
                        voucher.stock += 1;
                    }
                }
                Undo::RemoveOrder(order_id) => {
                    self.store.orders.remove(&order_id);
                }
            }
        }
    }
}

#[async_trait]
impl OrderUnitOfWork for MemoryUnitOfWork {
    async fn count_orders(&mut self, user_id: i64, voucher_id: i64) -> Result<u64> {
        Ok(self
            .store
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && o.voucher_id == voucher_id)
            .count() as u64)
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<u64> {
        let Some(mut voucher) = self.store.vouchers.get_mut(&voucher_id) else {
            return Ok(0);
        };
        if voucher.stock <= 0 {
            return Ok(0);
        }
        voucher.stock -= 1;
        drop(voucher);
        self.undo.push(Undo::RestoreStock(voucher_id));
        Ok(1)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()> {
        match self.store.orders.entry(order.id) {
            Entry::Occupied(_) => Err(CacheError::DatabaseError(format!(
                "duplicate order id {}",
                order.id
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(order.clone());
                self.undo.push(Undo::RemoveOrder(order.id));
                Ok(())
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.undo.clear();
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        debug!("Rolling back {} in-memory order steps", this.undo.len());
        this.revert();
        this.finished = true;
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished && !self.undo.is_empty() {
            warn!("Unit of work dropped without commit, reverting");
            self.revert();
        }
    }
}
