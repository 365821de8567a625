//! # Traffic Statistics
//!
//! Daily unique visitors tracked with a HyperLogLog sketch per day. The
//! sketch key carries a one-year TTL so old days age out on their own.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use thiserror::Error;

use crate::cache::keys;

/// Statistics errors
#[derive(Error, Debug)]
pub enum StatsError {
    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for statistics operations
pub type StatsResult<T> = Result<T, StatsError>;

/// Retention of a daily sketch.
const UV_KEY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Daily unique-visitor counter.
pub struct UvCounter {
    redis: ConnectionManager,
}

impl UvCounter {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Record one visitor against today's sketch.
    pub async fn record(&self, visitor: &str) -> StatsResult<()> {
        let key = keys::uv_key(&today());

        let mut pipe = redis::pipe();
        pipe.cmd("PFADD").arg(&key).arg(visitor).ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(UV_KEY_TTL.as_secs()).ignore();
        pipe.query_async::<_, ()>(&mut self.redis.clone()).await?;

        Ok(())
    }

    /// Approximate unique visitors for a `YYYYMMDD` date.
    pub async fn count(&self, date: &str) -> StatsResult<i64> {
        let count: i64 = redis::cmd("PFCOUNT")
            .arg(keys::uv_key(date))
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(count)
    }

    /// Approximate unique visitors so far today.
    pub async fn count_today(&self) -> StatsResult<i64> {
        self.count(&today()).await
    }
}

/// Today as `YYYYMMDD`.
fn today() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_today_shape() {
        let date = today();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }
}
