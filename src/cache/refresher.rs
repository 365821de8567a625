//! Background rebuild of logically-expired hot entries
//!
//! A single worker drains a bounded queue of shop ids, re-reads each shop
//! from the database and rewrites its cache envelope with a fresh logical
//! expiry. Readers never wait on this path: when the queue is full the
//! enqueue is dropped and the next reader gets another chance to schedule
//! the rebuild.

use chrono::Utc;
use redis::aio::ConnectionManager;
use sqlx::MySqlPool;
use tokio::sync::mpsc;

use crate::cache::keys;
use crate::cache::shop_cache::{CacheEnvelope, HOT_KEY_TTL};
use crate::cache::CacheResult;
use crate::store::shop_repo;

/// Pending rebuilds held at most; excess enqueues are dropped.
pub const REFRESH_QUEUE_CAPACITY: usize = 10;

/// Spawn the process-lifetime refresher worker and hand back its queue.
pub fn spawn_refresher(redis: ConnectionManager, pool: MySqlPool) -> mpsc::Sender<i64> {
    let (tx, mut rx) = mpsc::channel::<i64>(REFRESH_QUEUE_CAPACITY);

    tokio::spawn(async move {
        while let Some(id) = rx.recv().await {
            if let Err(e) = rebuild(&redis, &pool, id).await {
                log::warn!("hot-entry rebuild failed for shop {}: {}", id, e);
            }
        }
    });

    tx
}

/// Re-read one shop and rewrite its envelope with `expire_time = now + 10 s`.
///
/// The value is stored without a Redis TTL; expiry lives inside the payload.
async fn rebuild(redis: &ConnectionManager, pool: &MySqlPool, id: i64) -> CacheResult<()> {
    let shop = match shop_repo::query_by_id(pool, id).await? {
        Some(shop) => shop,
        None => {
            log::warn!("hot-entry rebuild skipped: shop {} no longer exists", id);
            return Ok(());
        }
    };

    let envelope = CacheEnvelope {
        data: shop,
        expire_time: Utc::now() + chrono::Duration::seconds(HOT_KEY_TTL.as_secs() as i64),
    };
    let payload = serde_json::to_string(&envelope)?;

    redis::cmd("SET")
        .arg(keys::shop_cache_key(id))
        .arg(payload)
        .query_async::<_, ()>(&mut redis.clone())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_enqueue() {
        // A detached receiver keeps the channel open without draining it.
        let (tx, _rx) = mpsc::channel::<i64>(REFRESH_QUEUE_CAPACITY);

        for id in 0..REFRESH_QUEUE_CAPACITY as i64 {
            assert!(tx.try_send(id).is_ok());
        }

        // Capacity reached: the reader-side enqueue must fail, not block.
        assert!(tx.try_send(999).is_err());
    }
}
