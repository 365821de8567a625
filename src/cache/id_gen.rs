//! Monotonic 64-bit id generation
//!
//! An id packs the seconds elapsed since a fixed epoch into the high bits
//! and a Redis-incremented daily counter into the low 32. Counter keys roll
//! over per calendar day, so the counter space resets every midnight while
//! ids keep increasing. Callers treat the result as an opaque `i64`.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;

use crate::cache::keys::ID_COUNTER_KEY;
use crate::cache::CacheResult;

/// Generator epoch (2024-01-01 00:00:01 UTC).
const BEGIN_TIMESTAMP: i64 = 1_704_067_201;

/// Low bits reserved for the daily counter.
const COUNT_BITS: u32 = 32;

/// Redis-backed id generator.
#[derive(Clone)]
pub struct IdWorker {
    redis: ConnectionManager,
}

impl IdWorker {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Allocate the next id for `prefix`.
    pub async fn next_id(&self, prefix: &str) -> CacheResult<i64> {
        let now = Utc::now();

        let count: i64 = redis::cmd("INCR")
            .arg(counter_key(prefix, now))
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(pack(now.timestamp(), count))
    }
}

/// `icr:<prefix>:<YYYY:MM:DD>`
fn counter_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}{}:{}", ID_COUNTER_KEY, prefix, now.format("%Y:%m:%d"))
}

/// Seconds-since-epoch in the high bits, counter in the low 32.
fn pack(unix_seconds: i64, count: i64) -> i64 {
    (unix_seconds - BEGIN_TIMESTAMP) << COUNT_BITS | count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_pack_layout() {
        let id = pack(BEGIN_TIMESTAMP + 5, 3);
        assert_eq!(id >> COUNT_BITS, 5);
        assert_eq!(id & 0xffff_ffff, 3);
    }

    #[test]
    fn test_counter_key_format() {
        let when = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(counter_key("order", when), "icr:order:2024:06:01");
    }

    #[test]
    fn test_ids_increase_within_a_second() {
        let now = BEGIN_TIMESTAMP + 100;
        let first = pack(now, 1);
        let second = pack(now, 2);
        assert!(second > first);
    }

    #[test]
    fn test_ids_increase_across_seconds() {
        // A later second beats any smaller counter from the previous second.
        assert!(pack(BEGIN_TIMESTAMP + 2, 1) > pack(BEGIN_TIMESTAMP + 1, 500));
    }

    proptest! {
        #[test]
        fn prop_pack_monotonic(
            ts in BEGIN_TIMESTAMP..BEGIN_TIMESTAMP + 100_000_000,
            a in 1i64..u32::MAX as i64,
            b in 1i64..u32::MAX as i64,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(pack(ts, lo) <= pack(ts, hi));
            prop_assert!(pack(ts, hi) < pack(ts + 1, lo));
        }
    }
}
