//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 数据库模块
//!
//! 提供连接管理、建表以及基于 Sea-ORM 的订单数据源

use crate::config::DatabaseConfig;
use crate::error::{CacheError, Result};
use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

pub mod entity;
pub mod order_store;

pub use order_store::SeaOrmOrderStore;

/// 数据库类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// 从URL字符串解析数据库类型
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else if url.starts_with("mysql://") {
            DatabaseType::MySQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 建立数据库连接
///
/// 内存 SQLite 的每个连接都是独立的库，因此连接池固定为1。
///
/// # 参数
///
/// * `config` - 数据库配置
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let db_type = DatabaseType::from_url(&config.url);
    let max_connections = if db_type == DatabaseType::SQLite && config.url.contains(":memory:") {
        1
    } else {
        config.max_connections.max(1)
    };
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(connect_timeout)
        .sqlx_logging(false);

    let connection = match timeout(connect_timeout, Database::connect(opt)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            return Err(CacheError::DatabaseError(format!(
                "Failed to connect to {:?} database: {}",
                db_type, e
            )));
        }
        Err(_) => {
            return Err(CacheError::Timeout(format!(
                "database did not respond within {:?}",
                connect_timeout
            )));
        }
    };

    info!("{:?} database connected", db_type);
    Ok(connection)
}

/// 根据实体创建秒杀券表和订单表
///
/// 订单表额外带有 `(user_id, voucher_id)` 唯一索引，与下单时的一人一单检查互为兜底。
pub async fn create_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut vouchers = schema.create_table_from_entity(entity::seckill_voucher::Entity);
    vouchers.if_not_exists();
    db.execute(backend.build(&vouchers)).await?;

    let mut orders = schema.create_table_from_entity(entity::voucher_order::Entity);
    orders.if_not_exists();
    db.execute(backend.build(&orders)).await?;

    let unique_user_voucher = Index::create()
        .name("uk_voucher_order_user_voucher")
        .table(entity::voucher_order::Entity)
        .col(entity::voucher_order::Column::UserId)
        .col(entity::voucher_order::Column::VoucherId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&unique_user_voucher)).await?;

    debug!("Seckill schema ready");
    Ok(())
}
