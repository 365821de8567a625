//! Voucher and seckill-voucher queries over `tb_voucher` / `tb_seckill_voucher`.

use sqlx::{MySql, MySqlPool, Transaction};

use crate::model::{SeckillVoucher, Voucher, VOUCHER_TYPE_SECKILL};
use crate::store::StoreResult;

/// Insert the voucher master row inside an enclosing transaction and
/// backfill its generated id.
pub async fn insert_voucher(tx: &mut Transaction<'_, MySql>, voucher: &mut Voucher) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO tb_voucher \
         (shop_id, title, sub_title, rules, pay_value, actual_value, type, status, create_time, update_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(voucher.shop_id)
    .bind(&voucher.title)
    .bind(&voucher.sub_title)
    .bind(&voucher.rules)
    .bind(voucher.pay_value)
    .bind(voucher.actual_value)
    .bind(voucher.voucher_type)
    .bind(voucher.status)
    .bind(voucher.create_time)
    .bind(voucher.update_time)
    .execute(&mut **tx)
    .await?;

    voucher.id = result.last_insert_id() as i64;
    Ok(())
}

/// Insert the seckill row inside the same transaction as its voucher.
pub async fn insert_seckill(tx: &mut Transaction<'_, MySql>, seckill: &SeckillVoucher) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO tb_seckill_voucher \
         (voucher_id, stock, begin_time, end_time, create_time, update_time) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(seckill.voucher_id)
    .bind(seckill.stock)
    .bind(seckill.begin_time)
    .bind(seckill.end_time)
    .bind(seckill.create_time)
    .bind(seckill.update_time)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch the stock and sale window for a seckill voucher.
pub async fn query_seckill_by_id(pool: &MySqlPool, voucher_id: i64) -> StoreResult<Option<SeckillVoucher>> {
    let seckill = sqlx::query_as::<_, SeckillVoucher>(
        "SELECT * FROM tb_seckill_voucher WHERE voucher_id = ?",
    )
    .bind(voucher_id)
    .fetch_optional(pool)
    .await?;
    Ok(seckill)
}

/// Conditionally decrement stock; returns whether a row was touched.
///
/// The `stock > 0` guard is the database-side oversell defense: a zero row
/// count means the stock was already exhausted.
pub async fn decrement_stock(tx: &mut Transaction<'_, MySql>, voucher_id: i64) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE tb_seckill_voucher SET stock = stock - 1 WHERE voucher_id = ? AND stock > 0",
    )
    .bind(voucher_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// All vouchers for a shop, with seckill stock/window overlaid on
/// flash-sale entries.
pub async fn query_by_shop(pool: &MySqlPool, shop_id: i64) -> StoreResult<Vec<Voucher>> {
    let mut vouchers = sqlx::query_as::<_, Voucher>("SELECT * FROM tb_voucher WHERE shop_id = ?")
        .bind(shop_id)
        .fetch_all(pool)
        .await?;

    for voucher in &mut vouchers {
        if voucher.voucher_type != VOUCHER_TYPE_SECKILL {
            continue;
        }
        if let Some(seckill) = query_seckill_by_id(pool, voucher.id).await? {
            voucher.stock = seckill.stock;
            voucher.begin_time = Some(seckill.begin_time);
            voucher.end_time = Some(seckill.end_time);
        }
    }

    Ok(vouchers)
}
