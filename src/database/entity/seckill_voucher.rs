//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 秒杀券库存表 `tb_seckill_voucher`

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tb_seckill_voucher")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub voucher_id: i64,
    pub stock: i32,
    pub begin_time: ChronoDateTimeUtc,
    pub end_time: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
