//! # Read-Path Caching and Concurrency Primitives
//!
//! This module provides:
//! - Probabilistic membership filtering backed by a Redis bitset
//! - A token-fenced distributed lock with a watchdog renewal task
//! - Monotonic 64-bit id generation
//! - The read-through / write-invalidate shop cache with four read strategies
//! - The logical-expiration background refresher
//! - The shop-type list cache

use thiserror::Error;

/// Cache subsystem errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// The entity does not exist (row absent or negative marker hit).
    #[error("shop {0} not found")]
    NotFound(i64),

    /// The membership filter reported the id as definitely absent.
    #[error("shop {0} not found (blocked by membership filter)")]
    FilterBlocked(i64),

    /// A cached payload failed to decode; the entry is corrupt.
    #[error("corrupt cache entry at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Value encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lock subsystem error.
    #[error("lock error: {0}")]
    Lock(#[from] lock::LockError),
}

impl CacheError {
    /// Whether this error means "the entity does not exist", regardless of
    /// how the absence was discovered.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::FilterBlocked(_))
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

pub mod bloom;
pub mod id_gen;
pub mod keys;
pub mod lock;
pub mod refresher;
pub mod shop_cache;
pub mod type_list;

pub use bloom::BloomFilter;
pub use id_gen::IdWorker;
pub use lock::{DistributedLock, Lease};
pub use refresher::spawn_refresher;
pub use shop_cache::{ShopCache, ShopCacheStats};
pub use type_list::ShopTypeCache;
