//! # Backing-Store Access
//!
//! Connection construction for the two stores and one repository module per
//! aggregate. MySQL owns all authoritative state; Redis owns only derived
//! copies, locks, queues and indexes. Repository functions that must run
//! inside an enclosing transaction take `&mut Transaction` explicitly.

use redis::aio::ConnectionManager;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use thiserror::Error;

use crate::config::Config;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Default page size for listing queries.
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Page size for wide listing queries (blogs, name search).
pub const MAX_PAGE_SIZE: u32 = 10;

pub mod blog_repo;
pub mod follow_repo;
pub mod order_repo;
pub mod shop_repo;
pub mod user_repo;
pub mod voucher_repo;

/// Build the MySQL connection pool.
pub async fn connect_mysql(config: &Config) -> StoreResult<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.mysql_url())
        .await?;

    log::info!("connected to mysql at {}:{}", config.mysql_addr, config.mysql_port);
    Ok(pool)
}

/// Build the shared Redis connection manager.
pub async fn connect_redis(config: &Config) -> StoreResult<ConnectionManager> {
    let client = redis::Client::open(config.redis_url())?;
    let manager = ConnectionManager::new(client).await?;

    log::info!("connected to redis at {}:{}", config.redis_addr, config.redis_port);
    Ok(manager)
}

/// `FIELD(id, a, b, c)` ordering clause preserving a caller-supplied order.
pub(crate) fn field_order_clause(ids: &[i64]) -> String {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("FIELD(id,{})", joined)
}

/// `(a, b, c)` list literal for an `IN` clause over trusted numeric ids.
pub(crate) fn id_list_literal(ids: &[i64]) -> String {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("({})", joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_clause() {
        assert_eq!(field_order_clause(&[3, 1, 2]), "FIELD(id,3,1,2)");
    }

    #[test]
    fn test_id_list_literal() {
        assert_eq!(id_list_literal(&[10, 20]), "(10,20)");
    }
}
