//! Shop and shop-type queries over `tb_shop` / `tb_shop_type`.

use sqlx::{MySql, MySqlPool, Transaction};

use crate::model::{Shop, ShopType};
use crate::store::{field_order_clause, id_list_literal, StoreResult, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Fetch one shop by primary key.
pub async fn query_by_id(pool: &MySqlPool, id: i64) -> StoreResult<Option<Shop>> {
    let shop = sqlx::query_as::<_, Shop>("SELECT * FROM tb_shop WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(shop)
}

/// Fetch shops by id, preserving the order of `ids`.
pub async fn query_by_ids(pool: &MySqlPool, ids: &[i64]) -> StoreResult<Vec<Shop>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM tb_shop WHERE id IN {} ORDER BY {}",
        id_list_literal(ids),
        field_order_clause(ids)
    );
    let shops = sqlx::query_as::<_, Shop>(&sql).fetch_all(pool).await?;
    Ok(shops)
}

/// Page of shop ids strictly above `last_id`, ascending. Used by the
/// membership-filter preheat.
pub async fn list_ids_after(pool: &MySqlPool, last_id: i64, limit: u32) -> StoreResult<Vec<i64>> {
    let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM tb_shop WHERE id > ? ORDER BY id LIMIT ?")
        .bind(last_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Insert a shop and backfill its generated id.
pub async fn insert(pool: &MySqlPool, shop: &mut Shop) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO tb_shop \
         (name, type_id, images, area, address, x, y, avg_price, sold, comments, score, open_hours, create_time, update_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&shop.name)
    .bind(shop.type_id)
    .bind(&shop.images)
    .bind(&shop.area)
    .bind(&shop.address)
    .bind(shop.x)
    .bind(shop.y)
    .bind(shop.avg_price)
    .bind(shop.sold)
    .bind(shop.comments)
    .bind(shop.score)
    .bind(&shop.open_hours)
    .bind(shop.create_time)
    .bind(shop.update_time)
    .execute(pool)
    .await?;

    shop.id = result.last_insert_id() as i64;
    Ok(())
}

/// Full-row update inside an enclosing transaction.
pub async fn update(tx: &mut Transaction<'_, MySql>, shop: &Shop) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE tb_shop SET \
         name = ?, type_id = ?, images = ?, area = ?, address = ?, x = ?, y = ?, \
         avg_price = ?, sold = ?, comments = ?, score = ?, open_hours = ?, update_time = ? \
         WHERE id = ?",
    )
    .bind(&shop.name)
    .bind(shop.type_id)
    .bind(&shop.images)
    .bind(&shop.area)
    .bind(&shop.address)
    .bind(shop.x)
    .bind(shop.y)
    .bind(shop.avg_price)
    .bind(shop.sold)
    .bind(shop.comments)
    .bind(shop.score)
    .bind(&shop.open_hours)
    .bind(shop.update_time)
    .bind(shop.id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Row lock + existence check inside an enclosing transaction.
pub async fn query_by_id_in_tx(tx: &mut Transaction<'_, MySql>, id: i64) -> StoreResult<Option<Shop>> {
    let shop = sqlx::query_as::<_, Shop>("SELECT * FROM tb_shop WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(shop)
}

/// DB-side pagination by type, ordered by id.
pub async fn page_by_type(pool: &MySqlPool, type_id: i64, current: u32) -> StoreResult<Vec<Shop>> {
    let offset = current.saturating_sub(1) * DEFAULT_PAGE_SIZE;
    let shops = sqlx::query_as::<_, Shop>(
        "SELECT * FROM tb_shop WHERE type_id = ? ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(type_id)
    .bind(DEFAULT_PAGE_SIZE)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(shops)
}

/// LIKE-pattern name search, paged.
pub async fn page_by_name(pool: &MySqlPool, name: &str, current: u32) -> StoreResult<Vec<Shop>> {
    let offset = current.saturating_sub(1) * MAX_PAGE_SIZE;
    let pattern = format!("%{}%", name);
    let shops = sqlx::query_as::<_, Shop>("SELECT * FROM tb_shop WHERE name LIKE ? LIMIT ? OFFSET ?")
        .bind(pattern)
        .bind(MAX_PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(shops)
}

/// The full shop-type list, display order.
pub async fn list_types(pool: &MySqlPool) -> StoreResult<Vec<ShopType>> {
    let types = sqlx::query_as::<_, ShopType>("SELECT * FROM tb_shop_type ORDER BY sort ASC")
        .fetch_all(pool)
        .await?;
    Ok(types)
}
