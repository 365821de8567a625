//! Seckill gate
//!
//! Purchase admission is decided by one atomic server-side script: stock
//! check, one-purchase-per-user check, stock decrement, purchase-set insert
//! and the order-stream append either all happen or none do. The database
//! only ever sees orders that already passed the gate.

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use sqlx::MySqlPool;

use crate::cache::keys;
use crate::cache::IdWorker;
use crate::model::{SeckillVoucher, Voucher, VOUCHER_TYPE_SECKILL};
use crate::orders::{OrderError, OrderResult};
use crate::store::voucher_repo;

/// TTL on the mirrored stock counter.
const STOCK_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempts for the post-create stock-key write.
const STOCK_INIT_ATTEMPTS: u32 = 3;

/// The purchase gate. ARGV: voucherId, userId, orderId. Returns 0 on
/// success, 1 when stock is exhausted (or the counter was never
/// initialized), 2 on a repeat purchase.
static SECKILL_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local voucherId = ARGV[1]
        local userId = ARGV[2]
        local orderId = ARGV[3]
        local stockKey = 'seckill:stock:' .. voucherId
        local orderKey = 'seckill:order:' .. voucherId

        local stock = tonumber(redis.call('get', stockKey))
        if stock == nil or stock <= 0 then
            return 1
        end
        if redis.call('sismember', orderKey, userId) == 1 then
            return 2
        end

        redis.call('incrby', stockKey, -1)
        redis.call('sadd', orderKey, userId)
        redis.call('xadd', 'stream.orders', '*', 'id', orderId, 'userId', userId, 'voucherId', voucherId)
        return 0
        "#,
    )
});

/// Flash-sale entry point: admission checks plus voucher creation.
pub struct SeckillGate {
    redis: ConnectionManager,
    db: MySqlPool,
    ids: IdWorker,
}

impl SeckillGate {
    pub fn new(redis: ConnectionManager, db: MySqlPool) -> Self {
        Self {
            ids: IdWorker::new(redis.clone()),
            redis,
            db,
        }
    }

    /// Attempt a purchase. On success the order id is returned immediately;
    /// the row itself is materialized later by the stream consumers.
    pub async fn seckill_voucher(&self, voucher_id: i64, user_id: i64) -> OrderResult<i64> {
        let voucher = voucher_repo::query_seckill_by_id(&self.db, voucher_id)
            .await?
            .ok_or(OrderError::VoucherNotFound(voucher_id))?;

        check_window(Utc::now().naive_utc(), voucher.begin_time, voucher.end_time)?;

        let order_id = self.ids.next_id("order").await?;

        let verdict: i64 = SECKILL_SCRIPT
            .arg(voucher_id)
            .arg(user_id)
            .arg(order_id)
            .invoke_async(&mut self.redis.clone())
            .await?;

        map_script_result(verdict)?;
        Ok(order_id)
    }

    /// Create a voucher together with its seckill row in one transaction,
    /// then initialize the mirrored stock counter asynchronously.
    pub async fn add_seckill_voucher(&self, voucher: &mut Voucher) -> OrderResult<()> {
        let (begin_time, end_time) = match (voucher.begin_time, voucher.end_time) {
            (Some(begin), Some(end)) => (begin, end),
            _ => return Err(OrderError::MissingSaleWindow),
        };

        voucher.voucher_type = VOUCHER_TYPE_SECKILL;

        let mut tx = self.db.begin().await?;
        voucher_repo::insert_voucher(&mut tx, voucher).await?;
        voucher_repo::insert_seckill(
            &mut tx,
            &SeckillVoucher {
                voucher_id: voucher.id,
                stock: voucher.stock,
                begin_time,
                end_time,
                create_time: voucher.create_time,
                update_time: voucher.update_time,
            },
        )
        .await?;
        tx.commit().await?;

        // The counter write is deliberately off the request path: a voucher
        // whose counter never lands simply sells nothing until repaired.
        let redis = self.redis.clone();
        let voucher_id = voucher.id;
        let stock = voucher.stock;
        tokio::spawn(async move {
            init_stock_key(redis, voucher_id, stock).await;
        });

        Ok(())
    }
}

/// Write the stock counter with a bounded backoff retry.
async fn init_stock_key(redis: ConnectionManager, voucher_id: i64, stock: i32) {
    let key = keys::seckill_stock_key(voucher_id);

    for attempt in 1..=STOCK_INIT_ATTEMPTS {
        let written: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(&key)
            .arg(stock)
            .arg("EX")
            .arg(STOCK_KEY_TTL.as_secs())
            .query_async(&mut redis.clone())
            .await;

        match written {
            Ok(()) => return,
            Err(e) => {
                log::warn!("stock counter write {}/{} failed for {}: {}", attempt, STOCK_INIT_ATTEMPTS, key, e);
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
        }
    }

    log::error!("giving up on stock counter {}; voucher {} cannot sell until it is set", key, voucher_id);
}

/// Sale-window admission: both endpoints are inclusive.
fn check_window(now: NaiveDateTime, begin: NaiveDateTime, end: NaiveDateTime) -> OrderResult<()> {
    if now < begin {
        return Err(OrderError::SeckillNotStarted);
    }
    if now > end {
        return Err(OrderError::SeckillEnded);
    }
    Ok(())
}

/// Map the script's integer verdict onto the error contract.
fn map_script_result(verdict: i64) -> OrderResult<()> {
    match verdict {
        0 => Ok(()),
        1 | 2 => Err(OrderError::ConditionNotMet),
        other => Err(OrderError::UnexpectedScriptResult(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    #[test]
    fn test_window_boundaries() {
        let begin = at(10, 0, 0);
        let end = at(12, 0, 0);

        assert!(matches!(check_window(at(9, 59, 59), begin, end), Err(OrderError::SeckillNotStarted)));
        // The window is closed on both ends.
        assert!(check_window(begin, begin, end).is_ok());
        assert!(check_window(at(11, 0, 0), begin, end).is_ok());
        assert!(check_window(end, begin, end).is_ok());
        assert!(matches!(check_window(at(12, 0, 1), begin, end), Err(OrderError::SeckillEnded)));
    }

    #[test]
    fn test_script_result_mapping() {
        assert!(map_script_result(0).is_ok());
        assert!(matches!(map_script_result(1), Err(OrderError::ConditionNotMet)));
        assert!(matches!(map_script_result(2), Err(OrderError::ConditionNotMet)));
        assert!(matches!(map_script_result(3), Err(OrderError::UnexpectedScriptResult(3))));
        assert!(matches!(map_script_result(-1), Err(OrderError::UnexpectedScriptResult(-1))));
    }
}
