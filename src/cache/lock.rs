//! Distributed lock with token fencing and watchdog renewal
//!
//! A lock is a Redis key holding a caller-unique token with a lease TTL.
//! Release is an atomic compare-and-delete so an expired holder can never
//! delete a lease that has since been granted to someone else. The watchdog
//! variant spawns a renewal task that re-extends the TTL every third of the
//! lease while the holder is alive; renewal stops the moment the key no
//! longer carries our token or the lease is dropped.
//!
//! There is no queueing: contenders simply fail to acquire and retry.

use std::time::Duration;

use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Retry cadence used by [`DistributedLock::acquire_with_timeout`].
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Delete the key only if it still holds our token.
static UNLOCK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// Re-extend the TTL only if the key still holds our token.
static RENEW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("pexpire", KEYS[1], ARGV[2])
        else
            return 0
        end
        "#,
    )
});

/// A held lease. Dropping the lease stops its watchdog (if any) but does not
/// delete the key; pass it back to [`DistributedLock::unlock`] for that.
pub struct Lease {
    key: String,
    token: String,
    /// Held only by watchdog leases; dropping the sender ends the renewal task.
    watchdog: Option<watch::Sender<()>>,
}

impl Lease {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fencing token stored under the key.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Factory for named exclusive leases in Redis.
#[derive(Clone)]
pub struct DistributedLock {
    redis: ConnectionManager,
}

impl DistributedLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Single-shot acquisition: `SET key token NX PX ttl`.
    ///
    /// Returns `None` when another holder owns the key.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> LockResult<Option<Lease>> {
        let token = Uuid::new_v4().to_string();

        let granted: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.redis.clone())
            .await?;

        if granted.is_none() {
            return Ok(None);
        }

        Ok(Some(Lease {
            key: key.to_string(),
            token,
            watchdog: None,
        }))
    }

    /// Acquire and keep the lease alive: a background task re-extends the
    /// TTL every `ttl / 3` for as long as the key still carries our token.
    ///
    /// The renewal task is independent of any request future, so a caller
    /// whose request is cancelled mid-transaction does not lose the lease.
    pub async fn try_lock_with_watchdog(&self, key: &str, ttl: Duration) -> LockResult<Option<Lease>> {
        let mut lease = match self.try_lock(key, ttl).await? {
            Some(lease) => lease,
            None => return Ok(None),
        };

        let (stop_tx, mut stop_rx) = watch::channel(());
        let mut redis = self.redis.clone();
        let watch_key = lease.key.clone();
        let watch_token = lease.token.clone();
        let ttl_ms = ttl.as_millis() as u64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renewal_interval(ttl));
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let renewed: Result<i64, redis::RedisError> = RENEW_SCRIPT
                            .key(&watch_key)
                            .arg(&watch_token)
                            .arg(ttl_ms)
                            .invoke_async(&mut redis)
                            .await;

                        match renewed {
                            Ok(1) => {}
                            Ok(_) => {
                                log::warn!("lock {} no longer ours, watchdog stopping", watch_key);
                                break;
                            }
                            Err(e) => {
                                log::warn!("lock {} renewal failed: {}", watch_key, e);
                                break;
                            }
                        }
                    }
                    // Signalled or sender dropped: the holder released the lease.
                    _ = stop_rx.changed() => break,
                }
            }
        });

        lease.watchdog = Some(stop_tx);
        Ok(Some(lease))
    }

    /// Retry watchdog acquisition every 50 ms until `timeout` elapses.
    ///
    /// Returns `None` when the deadline passes without a grant.
    pub async fn acquire_with_timeout(
        &self,
        key: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> LockResult<Option<Lease>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(lease) = self.try_lock_with_watchdog(key, ttl).await? {
                return Ok(Some(lease));
            }
            if tokio::time::Instant::now() + ACQUIRE_RETRY_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    /// Release a lease: stop its watchdog, then compare-and-delete the key.
    ///
    /// Returns whether the key was actually deleted (false means the lease
    /// had already expired and possibly been re-granted).
    pub async fn unlock(&self, lease: Lease) -> LockResult<bool> {
        // Dropping the sender ends the renewal task; a renewal racing the
        // delete loses the token comparison and exits on its own.
        drop(lease.watchdog);

        let deleted: i64 = UNLOCK_SCRIPT
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut self.redis.clone())
            .await?;

        Ok(deleted == 1)
    }
}

/// Watchdog cadence: a third of the lease, never zero.
fn renewal_interval(ttl: Duration) -> Duration {
    let third = ttl / 3;
    if third.is_zero() {
        Duration::from_millis(1)
    } else {
        third
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_interval_is_a_third() {
        assert_eq!(renewal_interval(Duration::from_secs(9)), Duration::from_secs(3));
        assert_eq!(renewal_interval(Duration::from_secs(30)), Duration::from_secs(10));
    }

    #[test]
    fn test_renewal_interval_never_zero() {
        assert_eq!(renewal_interval(Duration::from_millis(1)), Duration::from_millis(1));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        assert_ne!(a, b);
    }
}
