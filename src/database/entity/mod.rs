//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀相关表的 Sea-ORM 实体。

pub mod seckill_voucher;
pub mod voucher_order;
