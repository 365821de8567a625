//! Stream-backed order materialization
//!
//! Two process-lifetime consumers drain the order stream as the consumer
//! group `g1`:
//! - the live consumer reads new entries and materializes them; a failed
//!   entry is simply not acknowledged and lands in the pending list
//! - the pending consumer re-reads the pending list, retries each entry up
//!   to three times (counter keys with a 24-hour TTL) and moves the rest to
//!   the dead-letter stream
//!
//! Materialization itself is idempotent: it re-checks ownership and stock
//! inside one database transaction under a per-user watchdog lock, so
//! at-least-once delivery cannot double-sell.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use sqlx::MySqlPool;

use crate::cache::keys;
use crate::cache::lock::DistributedLock;
use crate::model::VoucherOrder;
use crate::orders::{OrderError, OrderResult, CONSUMER_GROUP, CONSUMER_NAME, DEAD_LETTER_STREAM, ORDER_STREAM};
use crate::store::{order_repo, voucher_repo};

/// Live consumer batch size.
const LIVE_BATCH: usize = 100;
/// Live consumer block interval.
const LIVE_BLOCK: Duration = Duration::from_millis(200);
/// Pause after an empty live read.
const LIVE_IDLE_SLEEP: Duration = Duration::from_millis(100);
/// Pause after a live transport error.
const LIVE_ERROR_SLEEP: Duration = Duration::from_secs(1);

/// Pending consumer batch size.
const PENDING_BATCH: usize = 50;
/// Pending consumer block interval.
const PENDING_BLOCK: Duration = Duration::from_secs(5);
/// Pause after an empty pending read.
const PENDING_IDLE_SLEEP: Duration = Duration::from_secs(1);
/// Pause after a pending transport error.
const PENDING_ERROR_SLEEP: Duration = Duration::from_secs(2);

/// Attempts before a message is dead-lettered.
const MAX_RETRIES: i64 = 3;
/// Lifetime of a retry counter.
const RETRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Lease on the per-user materialization lock.
const MATERIALIZE_LOCK_TTL: Duration = Duration::from_secs(10);
/// Budget for acquiring that lock.
const MATERIALIZE_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// The order-stream consumer pair plus the materialization path.
pub struct OrderPipeline {
    redis: ConnectionManager,
    db: MySqlPool,
    lock: DistributedLock,
}

impl OrderPipeline {
    pub fn new(redis: ConnectionManager, db: MySqlPool) -> Self {
        Self {
            lock: DistributedLock::new(redis.clone()),
            redis,
            db,
        }
    }

    /// Create the consumer group (and the stream, if missing). Safe to call
    /// on every boot; an existing group is not an error.
    pub async fn ensure_group(&self) -> OrderResult<()> {
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(ORDER_STREAM)
            .arg(CONSUMER_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.redis.clone())
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the live and pending consumers for the life of the process.
    pub fn spawn_consumers(self: Arc<Self>) {
        let live = Arc::clone(&self);
        tokio::spawn(async move { live.run_live().await });

        let pending = self;
        tokio::spawn(async move { pending.run_pending().await });
    }

    /// Live consumer: `>` reads, materialize, ACK on success only.
    async fn run_live(&self) {
        let mut conn = self.redis.clone();
        let options = StreamReadOptions::default()
            .group(CONSUMER_GROUP, CONSUMER_NAME)
            .count(LIVE_BATCH)
            .block(LIVE_BLOCK.as_millis() as usize);

        loop {
            let reply: Option<StreamReadReply> =
                match conn.xread_options(&[ORDER_STREAM], &[">"], &options).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        log::error!("live consumer read failed: {}", e);
                        tokio::time::sleep(LIVE_ERROR_SLEEP).await;
                        continue;
                    }
                };

            let messages = flatten_reply(reply);
            if messages.is_empty() {
                tokio::time::sleep(LIVE_IDLE_SLEEP).await;
                continue;
            }

            for message in messages {
                match self.process_message(&message).await {
                    Ok(()) => self.ack(&message.id).await,
                    Err(e) => {
                        // Left unacknowledged on purpose: the pending
                        // consumer owns all retries.
                        log::warn!("order message {} failed, parked for retry: {}", message.id, e);
                    }
                }
            }
        }
    }

    /// Pending consumer: `0` reads with bounded retries and dead-lettering.
    async fn run_pending(&self) {
        let mut conn = self.redis.clone();
        let options = StreamReadOptions::default()
            .group(CONSUMER_GROUP, CONSUMER_NAME)
            .count(PENDING_BATCH)
            .block(PENDING_BLOCK.as_millis() as usize);

        loop {
            let reply: Option<StreamReadReply> =
                match conn.xread_options(&[ORDER_STREAM], &["0"], &options).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        log::error!("pending consumer read failed: {}", e);
                        tokio::time::sleep(PENDING_ERROR_SLEEP).await;
                        continue;
                    }
                };

            let messages = flatten_reply(reply);
            if messages.is_empty() {
                tokio::time::sleep(PENDING_IDLE_SLEEP).await;
                continue;
            }

            for message in messages {
                let retries = self.retry_count(&message.id).await;

                if retries >= MAX_RETRIES {
                    self.dead_letter(&message, &format!("retry limit {} reached", MAX_RETRIES)).await;
                    self.ack(&message.id).await;
                    self.clear_retry_count(&message.id).await;
                    continue;
                }

                match self.process_message(&message).await {
                    Ok(()) => {
                        self.ack(&message.id).await;
                        self.clear_retry_count(&message.id).await;
                    }
                    Err(e) => {
                        log::warn!("pending retry {} failed for {}: {}", retries + 1, message.id, e);
                        self.set_retry_count(&message.id, retries + 1).await;
                    }
                }
            }
        }
    }

    /// Decode one stream entry and materialize its order.
    async fn process_message(&self, message: &StreamId) -> OrderResult<()> {
        let order = decode_order(&message.id, &message.map)?;
        self.materialize(&order).await
    }

    /// Materialize under the per-user lock so concurrent retries of the
    /// same user's messages are serialized.
    async fn materialize(&self, order: &VoucherOrder) -> OrderResult<()> {
        let lock_key = keys::order_lock_key(order.user_id);

        let lease = self
            .lock
            .acquire_with_timeout(&lock_key, MATERIALIZE_LOCK_TTL, MATERIALIZE_LOCK_TIMEOUT)
            .await?
            .ok_or(OrderError::LockBusy(order.user_id))?;

        let result = self.create_order(order).await;

        if let Err(e) = self.lock.unlock(lease).await {
            log::warn!("failed to release order lock {}: {}", lock_key, e);
        }

        result
    }

    /// The materialization transaction: ownership re-check, conditional
    /// stock decrement, insert. Any failure rolls the whole thing back.
    async fn create_order(&self, order: &VoucherOrder) -> OrderResult<()> {
        let mut tx = self.db.begin().await?;

        if order_repo::has_purchased(&mut tx, order.user_id, order.voucher_id).await? {
            return Err(OrderError::DuplicateOrder);
        }

        if !voucher_repo::decrement_stock(&mut tx, order.voucher_id).await? {
            return Err(OrderError::StockNotEnough);
        }

        order_repo::insert(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Current retry count for a message; transport errors count as zero.
    async fn retry_count(&self, message_id: &str) -> i64 {
        let key = keys::retry_key(ORDER_STREAM, message_id);

        let raw: Result<Option<String>, redis::RedisError> =
            redis::cmd("GET").arg(&key).query_async(&mut self.redis.clone()).await;

        match raw {
            Ok(Some(count)) => count.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                log::warn!("failed to read retry counter {}: {}", key, e);
                0
            }
        }
    }

    async fn set_retry_count(&self, message_id: &str, count: i64) {
        let key = keys::retry_key(ORDER_STREAM, message_id);

        let written: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(&key)
            .arg(count)
            .arg("EX")
            .arg(RETRY_TTL.as_secs())
            .query_async(&mut self.redis.clone())
            .await;

        if let Err(e) = written {
            log::error!("failed to write retry counter {}: {}", key, e);
        }
    }

    async fn clear_retry_count(&self, message_id: &str) {
        let key = keys::retry_key(ORDER_STREAM, message_id);

        let deleted: Result<(), redis::RedisError> =
            redis::cmd("DEL").arg(&key).query_async(&mut self.redis.clone()).await;

        if let Err(e) = deleted {
            log::warn!("failed to clear retry counter {}: {}", key, e);
        }
    }

    /// Acknowledge a message; an ACK failure is logged, the group will
    /// redeliver and the idempotent materialization absorbs the duplicate.
    async fn ack(&self, message_id: &str) {
        let acked: Result<(), redis::RedisError> = redis::cmd("XACK")
            .arg(ORDER_STREAM)
            .arg(CONSUMER_GROUP)
            .arg(message_id)
            .query_async(&mut self.redis.clone())
            .await;

        if let Err(e) = acked {
            log::warn!("failed to ack message {}: {}", message_id, e);
        }
    }

    /// Record an exhausted message on the dead-letter stream.
    async fn dead_letter(&self, message: &StreamId, reason: &str) {
        log::warn!("dead-lettering order message {}: {}", message.id, reason);

        let appended: Result<(), redis::RedisError> = redis::cmd("XADD")
            .arg(DEAD_LETTER_STREAM)
            .arg("*")
            .arg("original_id")
            .arg(&message.id)
            .arg("values")
            .arg(values_json(&message.map))
            .arg("error")
            .arg(reason)
            .arg("time")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut self.redis.clone())
            .await;

        if let Err(e) = appended {
            log::error!("failed to append {} to dead-letter stream: {}", message.id, e);
        }
    }
}

/// All entries of a (possibly empty) group read, in stream order.
fn flatten_reply(reply: Option<StreamReadReply>) -> Vec<StreamId> {
    reply
        .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
        .unwrap_or_default()
}

/// Decode the `{id, userId, voucherId}` fields of a stream entry into a
/// fresh unpaid order.
fn decode_order(message_id: &str, fields: &HashMap<String, redis::Value>) -> OrderResult<VoucherOrder> {
    let order_id = field_i64(fields, "id");
    let user_id = field_i64(fields, "userId");
    let voucher_id = field_i64(fields, "voucherId");

    match (order_id, user_id, voucher_id) {
        (Some(order_id), Some(user_id), Some(voucher_id)) => {
            Ok(VoucherOrder::unpaid(order_id, user_id, voucher_id, Utc::now().naive_utc()))
        }
        _ => Err(OrderError::MalformedMessage(message_id.to_string())),
    }
}

/// A numeric stream field, if present and parseable.
fn field_i64(fields: &HashMap<String, redis::Value>, name: &str) -> Option<i64> {
    let value = fields.get(name)?;
    redis::from_redis_value::<String>(value).ok()?.parse().ok()
}

/// The entry's field map as one JSON object, keys sorted for stable output.
fn values_json(fields: &HashMap<String, redis::Value>) -> String {
    let map: BTreeMap<&str, String> = fields
        .iter()
        .map(|(key, value)| {
            let rendered = redis::from_redis_value::<String>(value)
                .unwrap_or_else(|_| format!("{:?}", value));
            (key.as_str(), rendered)
        })
        .collect();

    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(value: &str) -> redis::Value {
        redis::Value::Data(value.as_bytes().to_vec())
    }

    fn sample_fields() -> HashMap<String, redis::Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), raw("123456789"));
        fields.insert("userId".to_string(), raw("7"));
        fields.insert("voucherId".to_string(), raw("42"));
        fields
    }

    #[test]
    fn test_decode_order() {
        let order = decode_order("1-0", &sample_fields()).unwrap();
        assert_eq!(order.id, 123_456_789);
        assert_eq!(order.user_id, 7);
        assert_eq!(order.voucher_id, 42);
        assert_eq!(order.status, crate::model::OrderStatus::Unpaid.as_i32());
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let mut fields = sample_fields();
        fields.remove("voucherId");

        let err = decode_order("1-1", &fields).unwrap_err();
        assert!(matches!(err, OrderError::MalformedMessage(id) if id == "1-1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut fields = sample_fields();
        fields.insert("userId".to_string(), raw("not-a-number"));

        assert!(decode_order("1-2", &fields).is_err());
    }

    #[test]
    fn test_values_json_is_sorted_and_complete() {
        let rendered = values_json(&sample_fields());
        assert_eq!(rendered, r#"{"id":"123456789","userId":"7","voucherId":"42"}"#);
    }

    #[test]
    fn test_flatten_empty_reply() {
        assert!(flatten_reply(None).is_empty());
    }
}
