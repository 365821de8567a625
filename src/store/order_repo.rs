//! Voucher-order queries over `tb_voucher_order`.

use sqlx::{MySql, Transaction};

use crate::model::{OrderStatus, VoucherOrder};
use crate::store::StoreResult;

/// Whether `user_id` already holds a live order for `voucher_id`.
///
/// Checked inside the materialization transaction; canceled orders do not
/// count against the one-per-user limit.
pub async fn has_purchased(
    tx: &mut Transaction<'_, MySql>,
    user_id: i64,
    voucher_id: i64,
) -> StoreResult<bool> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tb_voucher_order \
         WHERE user_id = ? AND voucher_id = ? AND status <> ?",
    )
    .bind(user_id)
    .bind(voucher_id)
    .bind(OrderStatus::Canceled.as_i32())
    .fetch_one(&mut **tx)
    .await?;

    Ok(count > 0)
}

/// Insert a materialized order inside an enclosing transaction.
pub async fn insert(tx: &mut Transaction<'_, MySql>, order: &VoucherOrder) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO tb_voucher_order \
         (id, user_id, voucher_id, pay_type, status, create_time, update_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(order.voucher_id)
    .bind(order.pay_type)
    .bind(order.status)
    .bind(order.create_time)
    .bind(order.update_time)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
