//! # Flash-Sale Gate and Order Pipeline
//!
//! This module provides:
//! - The atomic seckill gate: stock, one-purchase-per-user and the stream
//!   append decided in a single server-side script
//! - Stream consumers that materialize orders with bounded retries and a
//!   dead-letter stream
//! - Idempotent order materialization under a per-user watchdog lock

use thiserror::Error;

/// Primary order stream.
pub const ORDER_STREAM: &str = "stream.orders";
/// Dead-letter stream for messages that exhausted their retries.
pub const DEAD_LETTER_STREAM: &str = "stream.orders.dead";
/// Consumer group name.
pub const CONSUMER_GROUP: &str = "g1";
/// Consumer name within the group.
pub const CONSUMER_NAME: &str = "c1";

/// Order subsystem errors
#[derive(Error, Debug)]
pub enum OrderError {
    /// The sale window has not opened yet.
    #[error("seckill has not started")]
    SeckillNotStarted,

    /// The sale window has closed.
    #[error("seckill has ended")]
    SeckillEnded,

    /// No seckill voucher with this id.
    #[error("seckill voucher {0} not found")]
    VoucherNotFound(i64),

    /// The gate rejected the purchase (no stock, or already purchased).
    #[error("purchase conditions not met")]
    ConditionNotMet,

    /// This user already holds a live order for the voucher.
    #[error("duplicate order")]
    DuplicateOrder,

    /// Database stock was exhausted at materialization time.
    #[error("stock not enough")]
    StockNotEnough,

    /// The per-user materialization lock could not be acquired in time.
    #[error("order lock busy for user {0}")]
    LockBusy(i64),

    /// The seckill voucher is missing its sale window.
    #[error("voucher is missing its sale window")]
    MissingSaleWindow,

    /// The gate script returned a tag outside its contract.
    #[error("unexpected seckill script result: {0}")]
    UnexpectedScriptResult(i64),

    /// A stream entry could not be decoded into an order.
    #[error("malformed order message {0}")]
    MalformedMessage(String),

    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Lock subsystem error.
    #[error("lock error: {0}")]
    Lock(#[from] crate::cache::lock::LockError),

    /// Id generation error.
    #[error("id generation error: {0}")]
    IdGeneration(#[from] crate::cache::CacheError),
}

/// Result type for order operations
pub type OrderResult<T> = Result<T, OrderError>;

pub mod pipeline;
pub mod seckill;

pub use pipeline::OrderPipeline;
pub use seckill::SeckillGate;
