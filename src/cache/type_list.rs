//! Shop-type list cache
//!
//! The home-page category list changes rarely; it is cached as a Redis list
//! of JSON-encoded entries in display order and rebuilt from the database
//! whenever the list is empty.

use redis::aio::ConnectionManager;
use sqlx::MySqlPool;

use crate::cache::keys::CACHE_SHOP_LIST;
use crate::cache::{CacheError, CacheResult};
use crate::model::ShopType;
use crate::store::shop_repo;

/// Read-through cache for the shop-type list.
pub struct ShopTypeCache {
    redis: ConnectionManager,
    db: MySqlPool,
}

impl ShopTypeCache {
    pub fn new(redis: ConnectionManager, db: MySqlPool) -> Self {
        Self { redis, db }
    }

    /// The full type list, cache first.
    pub async fn query_type_list(&self) -> CacheResult<Vec<ShopType>> {
        let cached: Vec<String> = redis::cmd("LRANGE")
            .arg(CACHE_SHOP_LIST)
            .arg(0)
            .arg(-1)
            .query_async(&mut self.redis.clone())
            .await?;

        if !cached.is_empty() {
            let mut types = Vec::with_capacity(cached.len());
            for raw in &cached {
                let shop_type = serde_json::from_str(raw).map_err(|source| CacheError::Corrupt {
                    key: CACHE_SHOP_LIST.to_string(),
                    source,
                })?;
                types.push(shop_type);
            }
            return Ok(types);
        }

        let types = shop_repo::list_types(&self.db).await?;
        for shop_type in &types {
            let payload = serde_json::to_string(shop_type)?;
            redis::cmd("RPUSH")
                .arg(CACHE_SHOP_LIST)
                .arg(payload)
                .query_async::<_, ()>(&mut self.redis.clone())
                .await?;
        }

        Ok(types)
    }

    /// Drop the cached list; the next read rebuilds it.
    pub async fn invalidate(&self) -> CacheResult<()> {
        redis::cmd("DEL")
            .arg(CACHE_SHOP_LIST)
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;
        Ok(())
    }
}
