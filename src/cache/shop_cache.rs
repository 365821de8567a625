//! Read-through / write-invalidate shop cache
//!
//! Four read strategies share the same primitives and differ only in how
//! they handle a cache miss:
//! - `query_by_id_cache_null`: negative caching + membership filter (default)
//! - `query_by_id_mutex`: a per-shop rebuild lock against hot-key stampedes
//! - `query_by_id_logic_expire`: logical expiry with background refresh,
//!   readers are served stale data and never block
//! - `query_by_id_with_cache`: plain TTL pass-through
//!
//! The write path updates the row and deletes the cache entry inside one
//! database transaction; an update that cannot also invalidate must not
//! commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tokio::sync::mpsc;

use crate::cache::bloom::BloomFilter;
use crate::cache::keys;
use crate::cache::lock::DistributedLock;
use crate::cache::refresher::spawn_refresher;
use crate::cache::{CacheError, CacheResult};
use crate::model::Shop;
use crate::store::{shop_repo, DEFAULT_PAGE_SIZE};

/// TTL for plain cached values and negative markers.
pub const SHOP_CACHE_TTL: Duration = Duration::from_secs(60);

/// Logical lifetime of a hot entry.
pub const HOT_KEY_TTL: Duration = Duration::from_secs(10);

/// Lease for per-shop rebuild locks.
const REBUILD_LOCK_TTL: Duration = Duration::from_secs(10);

/// Pause between acquisition attempts in the mutex strategy.
const MUTEX_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Geo search radius in meters.
const GEO_RADIUS_M: f64 = 5000.0;

/// Value wrapper carrying its own expiry, for entries stored without a
/// Redis TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    pub data: T,
    pub expire_time: DateTime<Utc>,
}

impl<T> CacheEnvelope<T> {
    /// Whether the embedded expiry is still in the future.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expire_time > now
    }
}

/// Counters for cache behavior, cheap enough to keep always-on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub negative_hits: u64,
    pub filter_blocked: u64,
    pub stale_serves: u64,
    pub db_loads: u64,
}

/// Read-through cache over shop records.
pub struct ShopCache {
    redis: ConnectionManager,
    db: MySqlPool,
    lock: DistributedLock,
    bloom: Arc<BloomFilter>,
    refresh_tx: mpsc::Sender<i64>,
    stats: RwLock<ShopCacheStats>,
}

impl ShopCache {
    /// Wire the cache and spawn its logical-expire refresher worker.
    pub fn new(redis: ConnectionManager, db: MySqlPool, bloom: Arc<BloomFilter>) -> Self {
        let refresh_tx = spawn_refresher(redis.clone(), db.clone());

        Self {
            lock: DistributedLock::new(redis.clone()),
            redis,
            db,
            bloom,
            refresh_tx,
            stats: RwLock::new(ShopCacheStats::default()),
        }
    }

    /// Snapshot of the behavior counters.
    pub fn stats(&self) -> ShopCacheStats {
        *self.stats.read()
    }

    /// Default read strategy: membership filter, then cache with negative
    /// markers, then database.
    ///
    /// An empty cached string means the shop is known to not exist; a
    /// database miss writes that marker with a one-minute TTL so repeated
    /// probes for absent ids cannot reach the database.
    pub async fn query_by_id_cache_null(&self, id: i64) -> CacheResult<Shop> {
        if !self.bloom.might_contain(id).await {
            self.stats.write().filter_blocked += 1;
            return Err(CacheError::FilterBlocked(id));
        }

        let key = keys::shop_cache_key(id);

        if let Some(raw) = self.read_cached(&key).await? {
            if raw.is_empty() {
                self.stats.write().negative_hits += 1;
                return Err(CacheError::NotFound(id));
            }
            self.stats.write().hits += 1;
            return decode_shop(&key, &raw);
        }

        self.stats.write().misses += 1;
        self.load_and_fill(id, &key, true).await
    }

    /// Plain TTL strategy: as the default but without negative markers.
    pub async fn query_by_id_with_cache(&self, id: i64) -> CacheResult<Shop> {
        if !self.bloom.might_contain(id).await {
            self.stats.write().filter_blocked += 1;
            return Err(CacheError::FilterBlocked(id));
        }

        let key = keys::shop_cache_key(id);

        if let Some(raw) = self.read_cached(&key).await? {
            self.stats.write().hits += 1;
            return decode_shop(&key, &raw);
        }

        self.stats.write().misses += 1;
        self.load_and_fill(id, &key, false).await
    }

    /// Mutex strategy: a cache miss must win the per-shop rebuild lock
    /// before touching the database; losers sleep 50 ms and re-read.
    pub async fn query_by_id_mutex(&self, id: i64) -> CacheResult<Shop> {
        if !self.bloom.might_contain(id).await {
            self.stats.write().filter_blocked += 1;
            return Err(CacheError::FilterBlocked(id));
        }

        let key = keys::shop_cache_key(id);
        let lock_key = keys::shop_lock_key(id);

        loop {
            if let Some(raw) = self.read_cached(&key).await? {
                if raw.is_empty() {
                    self.stats.write().negative_hits += 1;
                    return Err(CacheError::NotFound(id));
                }
                self.stats.write().hits += 1;
                return decode_shop(&key, &raw);
            }

            let lease = match self.lock.try_lock_with_watchdog(&lock_key, REBUILD_LOCK_TTL).await? {
                Some(lease) => lease,
                None => {
                    tokio::time::sleep(MUTEX_RETRY_INTERVAL).await;
                    continue;
                }
            };

            self.stats.write().misses += 1;

            // Re-check under the lock: a concurrent holder may have already
            // rebuilt the entry while we were acquiring.
            let result = match self.read_cached(&key).await {
                Ok(Some(raw)) if raw.is_empty() => Err(CacheError::NotFound(id)),
                Ok(Some(raw)) => decode_shop(&key, &raw),
                Ok(None) => self.load_and_fill(id, &key, true).await,
                Err(e) => Err(e),
            };

            if let Err(e) = self.lock.unlock(lease).await {
                log::warn!("failed to release rebuild lock {}: {}", lock_key, e);
            }

            return result;
        }
    }

    /// Logical-expiration strategy for pre-warmed hot entries.
    ///
    /// The stored value wraps the shop together with its expiry; a stale hit
    /// is still served immediately while the rebuild is handed to the
    /// background refresher (only by the reader that wins the rebuild lock,
    /// and only if the refresh queue has room).
    pub async fn query_by_id_logic_expire(&self, id: i64) -> CacheResult<Shop> {
        let key = keys::shop_cache_key(id);

        let raw = match self.read_cached(&key).await? {
            Some(raw) if !raw.is_empty() => raw,
            // Hot entries are preloaded offline; a miss means the id is not
            // part of the hot set.
            _ => return Err(CacheError::NotFound(id)),
        };

        let envelope: CacheEnvelope<Shop> =
            serde_json::from_str(&raw).map_err(|source| CacheError::Corrupt { key: key.clone(), source })?;

        if envelope.is_fresh(Utc::now()) {
            self.stats.write().hits += 1;
            return Ok(envelope.data);
        }

        let lock_key = keys::shop_lock_key(id);
        if let Some(lease) = self.lock.try_lock_with_watchdog(&lock_key, REBUILD_LOCK_TTL).await? {
            if self.refresh_tx.try_send(id).is_err() {
                log::debug!("refresh queue full, shop {} rebuild deferred to a later reader", id);
            }
            if let Err(e) = self.lock.unlock(lease).await {
                log::warn!("failed to release rebuild lock {}: {}", lock_key, e);
            }
        }

        self.stats.write().stale_serves += 1;
        Ok(envelope.data)
    }

    /// Update a shop row and invalidate its cache entry in one transaction.
    ///
    /// The DELETE runs before COMMIT: if the invalidation fails the whole
    /// update rolls back. A reader racing the window between DELETE and
    /// COMMIT can refill the old value; that entry ages out within one TTL.
    pub async fn update_with_cache(&self, shop: &Shop) -> CacheResult<()> {
        let mut tx = self.db.begin().await?;

        if shop_repo::query_by_id_in_tx(&mut tx, shop.id).await?.is_none() {
            return Err(CacheError::NotFound(shop.id));
        }

        shop_repo::update(&mut tx, shop).await?;

        redis::cmd("DEL")
            .arg(keys::shop_cache_key(shop.id))
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Insert a shop, then add its id to the membership filter best-effort.
    pub async fn save(&self, shop: &mut Shop) -> CacheResult<()> {
        shop_repo::insert(&self.db, shop).await?;

        if shop.id > 0 {
            if let Err(e) = self.bloom.add(shop.id).await {
                log::warn!("failed to add shop {} to membership filter after save: {}", shop.id, e);
            }
        }

        Ok(())
    }

    /// Shops of one type, ordered by distance when a location is given.
    ///
    /// Without coordinates this is a plain id-ordered database page. With
    /// coordinates the geo index supplies the page of ids (ascending
    /// distance, 5 km radius); rows are hydrated preserving that order and
    /// annotated with their distance.
    pub async fn query_by_type(&self, type_id: i64, current: u32, x: f64, y: f64) -> CacheResult<Vec<Shop>> {
        if x == 0.0 || y == 0.0 {
            return Ok(shop_repo::page_by_type(&self.db, type_id, current).await?);
        }

        let from = (current.saturating_sub(1) * DEFAULT_PAGE_SIZE) as usize;
        let to = (current * DEFAULT_PAGE_SIZE) as usize;

        let locations: Vec<(String, f64)> = redis::cmd("GEOSEARCH")
            .arg(keys::shop_geo_key(type_id))
            .arg("FROMLONLAT")
            .arg(x)
            .arg(y)
            .arg("BYRADIUS")
            .arg(GEO_RADIUS_M)
            .arg("m")
            .arg("ASC")
            .arg("COUNT")
            .arg(to)
            .arg("WITHDIST")
            .query_async(&mut self.redis.clone())
            .await?;

        let window = match page_window(locations.len(), from, to) {
            Some(window) => window,
            None => return Ok(Vec::new()),
        };

        let mut ids = Vec::with_capacity(window.len());
        let mut distances = std::collections::HashMap::with_capacity(window.len());
        for (member, dist) in &locations[window] {
            if let Ok(id) = member.parse::<i64>() {
                ids.push(id);
                distances.insert(id, *dist);
            }
        }

        let mut shops = shop_repo::query_by_ids(&self.db, &ids).await?;
        for shop in &mut shops {
            shop.distance = distances.get(&shop.id).copied().unwrap_or_default();
        }

        Ok(shops)
    }

    /// LIKE-pattern name search; no cache involved.
    pub async fn query_by_name(&self, name: &str, current: u32) -> CacheResult<Vec<Shop>> {
        Ok(shop_repo::page_by_name(&self.db, name, current).await?)
    }

    /// Rebuild the per-type geo indexes from the database. Run at boot.
    pub async fn preheat_geo_index(&self) -> CacheResult<u64> {
        let mut total = 0u64;
        let mut last_id = 0i64;

        loop {
            let ids = shop_repo::list_ids_after(&self.db, last_id, 500).await?;
            if ids.is_empty() {
                break;
            }
            if let Some(&last) = ids.last() {
                last_id = last;
            }

            let shops = shop_repo::query_by_ids(&self.db, &ids).await?;
            for shop in &shops {
                redis::cmd("GEOADD")
                    .arg(keys::shop_geo_key(shop.type_id))
                    .arg(shop.x)
                    .arg(shop.y)
                    .arg(shop.id)
                    .query_async::<_, ()>(&mut self.redis.clone())
                    .await?;
            }
            total += shops.len() as u64;
        }

        log::info!("geo index preheated with {} shops", total);
        Ok(total)
    }

    /// GET returning `None` on a missing key.
    async fn read_cached(&self, key: &str) -> CacheResult<Option<String>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(raw)
    }

    /// Database load on a cache miss, filling either the value or (when
    /// `negative` is set) the one-minute empty marker.
    async fn load_and_fill(&self, id: i64, key: &str, negative: bool) -> CacheResult<Shop> {
        self.stats.write().db_loads += 1;

        let shop = match shop_repo::query_by_id(&self.db, id).await? {
            Some(shop) => shop,
            None => {
                if negative {
                    redis::cmd("SET")
                        .arg(key)
                        .arg("")
                        .arg("EX")
                        .arg(SHOP_CACHE_TTL.as_secs())
                        .query_async::<_, ()>(&mut self.redis.clone())
                        .await?;
                }
                return Err(CacheError::NotFound(id));
            }
        };

        self.ensure_in_filter(id).await;

        let payload = serde_json::to_string(&shop)?;
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(SHOP_CACHE_TTL.as_secs())
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;

        Ok(shop)
    }

    /// Close the preheat-miss race: a row that exists in the database must
    /// also be present in the filter. Best-effort.
    async fn ensure_in_filter(&self, id: i64) {
        match self.bloom.contains(id).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.bloom.add(id).await {
                    log::warn!("failed to add shop {} to membership filter: {}", id, e);
                }
            }
            Err(e) => {
                log::warn!("membership re-check failed for shop {}: {}", id, e);
            }
        }
    }
}

/// Decode a cached shop payload, flagging corrupt entries.
fn decode_shop(key: &str, raw: &str) -> CacheResult<Shop> {
    serde_json::from_str(raw).map_err(|source| CacheError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// The `[from, to)` slice of a geo result of `len` entries, or `None` when
/// the page starts past the end.
fn page_window(len: usize, from: usize, to: usize) -> Option<std::ops::Range<usize>> {
    if len == 0 || from >= len {
        return None;
    }
    Some(from..to.min(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_shop() -> Shop {
        Shop {
            id: 9,
            name: "Pier Teahouse".to_string(),
            type_id: 2,
            images: String::new(),
            area: "Old Town".to_string(),
            address: "3 Canal St".to_string(),
            x: 120.1,
            y: 30.2,
            avg_price: 30,
            sold: 10,
            comments: 4,
            score: 45,
            open_hours: "09:00-21:00".to_string(),
            create_time: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(9, 0, 0).unwrap(),
            update_time: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(9, 0, 0).unwrap(),
            distance: 0.0,
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = CacheEnvelope {
            data: sample_shop(),
            expire_time: Utc::now(),
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        assert!(encoded.contains("\"expireTime\""));
        assert!(encoded.contains("\"data\""));

        let decoded: CacheEnvelope<Shop> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_freshness() {
        let now = Utc::now();
        let fresh = CacheEnvelope { data: 1, expire_time: now + chrono::Duration::seconds(10) };
        let stale = CacheEnvelope { data: 1, expire_time: now - chrono::Duration::seconds(1) };

        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
        // Expiry exactly at `now` counts as stale.
        let edge = CacheEnvelope { data: 1, expire_time: now };
        assert!(!edge.is_fresh(now));
    }

    #[test]
    fn test_decode_corrupt_payload() {
        let err = decode_shop("cache:shop:9", "{not json").unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_round_trip() {
        let shop = sample_shop();
        let raw = serde_json::to_string(&shop).unwrap();
        assert_eq!(decode_shop("cache:shop:9", &raw).unwrap(), shop);
    }

    #[test]
    fn test_page_window() {
        // Second page of size 5 over 12 results.
        assert_eq!(page_window(12, 5, 10), Some(5..10));
        // Partial final page.
        assert_eq!(page_window(7, 5, 10), Some(5..7));
        // Page starts past the end.
        assert_eq!(page_window(5, 5, 10), None);
        assert_eq!(page_window(0, 0, 5), None);
        // First page.
        assert_eq!(page_window(3, 0, 5), Some(0..3));
    }
}
