//! Distributed Bloom filter over a Redis bitset
//!
//! One-sided membership test for shop ids: a zero bit means the id was never
//! added; all-ones means the id is *possibly* present. Bit positions come
//! from `k` seeded FNV-1a hashes of the little-endian id, and both `m` (bit
//! array size) and `k` (hash count) are derived from the expected cardinality
//! and the target false-positive rate at construction time.
//!
//! The filter starts out "not ready": until the first successful add lands,
//! an empty bitset would answer "absent" for everything, so `contains`
//! reports possibly-present instead of consulting Redis.

use std::sync::atomic::{AtomicBool, Ordering};

use redis::aio::ConnectionManager;
use sqlx::MySqlPool;

use crate::cache::CacheResult;
use crate::store::shop_repo;

/// Ids per preheat page.
const PREHEAT_BATCH: usize = 500;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Redis-backed Bloom filter keyed by 64-bit ids.
pub struct BloomFilter {
    redis: ConnectionManager,
    key: String,
    /// Bit array size.
    m: u64,
    /// Number of hash functions.
    k: u64,
    /// False until the first successful add completes.
    ready: AtomicBool,
}

impl BloomFilter {
    /// Create a filter sized for `n` expected elements at false-positive
    /// rate `p`.
    ///
    /// # Panics
    ///
    /// Panics if `p` is outside `(0, 1)` or `n` is zero; both are boot-time
    /// configuration errors.
    pub fn new(redis: ConnectionManager, key: impl Into<String>, n: u64, p: f64) -> Self {
        assert!(p > 0.0 && p < 1.0, "false positive rate must be in (0, 1)");
        assert!(n > 0, "expected cardinality must be positive");

        let m = optimal_m(n, p);
        let k = optimal_k(n, m);

        Self {
            redis,
            key: key.into(),
            m,
            k,
            ready: AtomicBool::new(false),
        }
    }

    /// Bit array size in bits.
    pub fn bits(&self) -> u64 {
        self.m
    }

    /// Number of hash functions.
    pub fn hashes(&self) -> u64 {
        self.k
    }

    /// Whether at least one add has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Set the `k` bits for `id` in one pipelined batch.
    pub async fn add(&self, id: i64) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        for offset in bit_offsets(id, self.m, self.k) {
            pipe.cmd("SETBIT").arg(&self.key).arg(offset).arg(1).ignore();
        }

        pipe.query_async::<_, ()>(&mut self.redis.clone()).await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Set the bits for every id in a single pipelined batch.
    pub async fn add_batch(&self, ids: &[i64]) -> CacheResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for &id in ids {
            for offset in bit_offsets(id, self.m, self.k) {
                pipe.cmd("SETBIT").arg(&self.key).arg(offset).arg(1).ignore();
            }
        }

        pipe.query_async::<_, ()>(&mut self.redis.clone()).await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Membership test. `false` is definitive; `true` means possibly present.
    ///
    /// A not-yet-preheated filter answers possibly-present for every id.
    pub async fn contains(&self, id: i64) -> CacheResult<bool> {
        if !self.is_ready() {
            return Ok(true);
        }

        let mut pipe = redis::pipe();
        for offset in bit_offsets(id, self.m, self.k) {
            pipe.cmd("GETBIT").arg(&self.key).arg(offset);
        }

        let bits: Vec<u8> = pipe.query_async(&mut self.redis.clone()).await?;
        Ok(bits.iter().all(|&bit| bit == 1))
    }

    /// `contains` with the read-path failure policy applied: a transport
    /// error is logged and counted as possibly-present, never as absence.
    pub async fn might_contain(&self, id: i64) -> bool {
        match self.contains(id).await {
            Ok(present) => present,
            Err(e) => {
                log::warn!("membership check failed for shop {}: {}, treating as present", id, e);
                true
            }
        }
    }

    /// Load every shop id from the database in pages and add them.
    ///
    /// Meant to run as a startup task; reads arriving before it finishes see
    /// a not-ready filter and bypass the membership test.
    pub async fn preheat(&self, pool: &MySqlPool) -> CacheResult<u64> {
        let mut total = 0u64;
        let mut last_id = 0i64;

        loop {
            let ids = shop_repo::list_ids_after(pool, last_id, PREHEAT_BATCH as u32).await?;
            if ids.is_empty() {
                break;
            }

            if let Some(&last) = ids.last() {
                last_id = last;
            }
            total += ids.len() as u64;

            if let Err(e) = self.add_batch(&ids).await {
                // Batch transport failure: retry the page one id at a time.
                log::warn!("filter batch add failed ({}), falling back to per-id adds", e);
                for &id in &ids {
                    self.add(id).await?;
                }
            }
        }

        log::info!("membership filter preheated with {} shop ids", total);
        Ok(total)
    }
}

/// Optimal bit-array size: `ceil(-n * ln p / (ln 2)^2)`.
fn optimal_m(n: u64, p: f64) -> u64 {
    (-(n as f64) * p.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil() as u64
}

/// Optimal hash count: `ceil((m / n) * ln 2)`.
fn optimal_k(n: u64, m: u64) -> u64 {
    ((m as f64 / n as f64) * std::f64::consts::LN_2).ceil() as u64
}

/// FNV-1a over a 4-byte big-endian seed prefix followed by `data`.
fn hash_with_seed(data: &[u8], seed: u32) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in seed.to_be_bytes().iter().chain(data.iter()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The `k` bit positions for `id` in an `m`-bit array.
fn bit_offsets(id: i64, m: u64, k: u64) -> Vec<u64> {
    let data = (id as u64).to_le_bytes();
    (0..k).map(|seed| hash_with_seed(&data, seed as u32) % m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parameter_math() {
        // Canonical sizing for n=100_000, p=0.01.
        let m = optimal_m(100_000, 0.01);
        let k = optimal_k(100_000, m);
        assert_eq!(m, 958_506);
        assert_eq!(k, 7);

        // Looser target needs fewer bits and hashes.
        let m_loose = optimal_m(100_000, 0.1);
        let k_loose = optimal_k(100_000, m_loose);
        assert!(m_loose < m);
        assert!(k_loose < k);
    }

    #[test]
    fn test_hash_is_deterministic_and_seed_sensitive() {
        let data = 42i64.to_le_bytes();
        assert_eq!(hash_with_seed(&data, 0), hash_with_seed(&data, 0));
        assert_ne!(hash_with_seed(&data, 0), hash_with_seed(&data, 1));

        let other = 43i64.to_le_bytes();
        assert_ne!(hash_with_seed(&data, 0), hash_with_seed(&other, 0));
    }

    #[test]
    fn test_offsets_shape() {
        let offsets = bit_offsets(123_456, 958_506, 7);
        assert_eq!(offsets.len(), 7);
        assert!(offsets.iter().all(|&o| o < 958_506));
    }

    proptest! {
        #[test]
        fn prop_offsets_in_range(id in any::<i64>(), m in 1u64..10_000_000, k in 1u64..16) {
            for offset in bit_offsets(id, m, k) {
                prop_assert!(offset < m);
            }
        }

        #[test]
        fn prop_offsets_deterministic(id in any::<i64>()) {
            prop_assert_eq!(bit_offsets(id, 958_506, 7), bit_offsets(id, 958_506, 7));
        }
    }
}
