//! Blog queries over `tb_blog`.

use sqlx::MySqlPool;

use crate::model::Blog;
use crate::store::{field_order_clause, id_list_literal, StoreResult, MAX_PAGE_SIZE};

/// Insert a blog and backfill its generated id.
pub async fn insert(pool: &MySqlPool, blog: &mut Blog) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO tb_blog \
         (shop_id, user_id, title, images, content, liked, comments, create_time, update_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(blog.shop_id)
    .bind(blog.user_id)
    .bind(&blog.title)
    .bind(&blog.images)
    .bind(&blog.content)
    .bind(blog.liked)
    .bind(blog.comments)
    .bind(blog.create_time)
    .bind(blog.update_time)
    .execute(pool)
    .await?;

    blog.id = result.last_insert_id() as i64;
    Ok(())
}

/// Fetch one blog by id.
pub async fn query_by_id(pool: &MySqlPool, id: i64) -> StoreResult<Option<Blog>> {
    let blog = sqlx::query_as::<_, Blog>("SELECT * FROM tb_blog WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(blog)
}

/// Fetch blogs by id, preserving the order of `ids`.
pub async fn query_by_ids(pool: &MySqlPool, ids: &[i64]) -> StoreResult<Vec<Blog>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM tb_blog WHERE id IN {} ORDER BY {}",
        id_list_literal(ids),
        field_order_clause(ids)
    );
    let blogs = sqlx::query_as::<_, Blog>(&sql).fetch_all(pool).await?;
    Ok(blogs)
}

/// Page of the most-liked blogs.
pub async fn page_hot(pool: &MySqlPool, current: u32) -> StoreResult<Vec<Blog>> {
    let offset = current.saturating_sub(1) * MAX_PAGE_SIZE;
    let blogs = sqlx::query_as::<_, Blog>("SELECT * FROM tb_blog ORDER BY liked DESC LIMIT ? OFFSET ?")
        .bind(MAX_PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(blogs)
}

/// Page of one author's blogs.
pub async fn page_by_user(pool: &MySqlPool, user_id: i64, current: u32) -> StoreResult<Vec<Blog>> {
    let offset = current.saturating_sub(1) * MAX_PAGE_SIZE;
    let blogs = sqlx::query_as::<_, Blog>("SELECT * FROM tb_blog WHERE user_id = ? LIMIT ? OFFSET ?")
        .bind(user_id)
        .bind(MAX_PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(blogs)
}

/// Bump the denormalized like counter.
pub async fn incr_liked(pool: &MySqlPool, id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE tb_blog SET liked = liked + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop the denormalized like counter.
pub async fn decr_liked(pool: &MySqlPool, id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE tb_blog SET liked = liked - 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
