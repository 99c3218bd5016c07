//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Sea-ORM 的订单数据源。

use super::entity::{seckill_voucher, voucher_order};
use crate::error::Result;
use crate::order::{OrderStore, OrderUnitOfWork, SeckillVoucher, VoucherOrder};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, TransactionTrait,
};
use tracing::{debug, instrument};

impl From<seckill_voucher::Model> for SeckillVoucher {
    fn from(model: seckill_voucher::Model) -> Self {
        Self {
            voucher_id: model.voucher_id,
            stock: model.stock,
            begin_time: model.begin_time,
            end_time: model.end_time,
        }
    }
}

/// Sea-ORM 订单数据源
///
/// 每个工作单元对应一个数据库事务。
#[derive(Clone, Debug)]
pub struct SeaOrmOrderStore {
    db: DatabaseConnection,
}

impl SeaOrmOrderStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 写入一张秒杀券
    pub async fn insert_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        let model = seckill_voucher::ActiveModel {
            voucher_id: Set(voucher.voucher_id),
            stock: Set(voucher.stock),
            begin_time: Set(voucher.begin_time),
            end_time: Set(voucher.end_time),
        };
        seckill_voucher::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    /// 当前库存
    pub async fn stock(&self, voucher_id: i64) -> Result<Option<i32>> {
        Ok(seckill_voucher::Entity::find_by_id(voucher_id)
            .one(&self.db)
            .await?
            .map(|v| v.stock))
    }

    /// 订单总数
    pub async fn order_count(&self) -> Result<u64> {
        Ok(voucher_order::Entity::find().count(&self.db).await?)
    }
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    #[instrument(skip(self), level = "debug")]
    async fn find_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>> {
        Ok(seckill_voucher::Entity::find_by_id(voucher_id)
            .one(&self.db)
            .await?
            .map(SeckillVoucher::from))
    }

    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>> {
        let txn = self.db.begin().await?;
        Ok(Box::new(SeaOrmUnitOfWork { txn }))
    }
}

struct SeaOrmUnitOfWork {
    txn: DatabaseTransaction,
}

#[async_trait]
impl OrderUnitOfWork for SeaOrmUnitOfWork {
    async fn count_orders(&mut self, user_id: i64, voucher_id: i64) -> Result<u64> {
        Ok(voucher_order::Entity::find()
            .filter(voucher_order::Column::UserId.eq(user_id))
            .filter(voucher_order::Column::VoucherId.eq(voucher_id))
            .count(&self.txn)
            .await?)
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<u64> {
        let result = seckill_voucher::Entity::update_many()
            .col_expr(
                seckill_voucher::Column::Stock,
                Expr::col(seckill_voucher::Column::Stock).sub(1),
            )
            .filter(seckill_voucher::Column::VoucherId.eq(voucher_id))
            .filter(seckill_voucher::Column::Stock.gt(0))
            .exec(&self.txn)
            .await?;
        debug!(
            "Conditional stock decrement on voucher {} affected {} rows",
            voucher_id, result.rows_affected
        );
        Ok(result.rows_affected)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()> {
        let model = voucher_order::ActiveModel {
            id: Set(order.id),
            user_id: Set(order.user_id),
            voucher_id: Set(order.voucher_id),
            create_time: Set(order.create_time),
        };
        voucher_order::Entity::insert(model)
            .exec_without_returning(&self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}
