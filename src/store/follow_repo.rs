//! Follow-graph queries over `tb_follow`.

use sqlx::MySqlPool;

use crate::model::Follow;
use crate::store::StoreResult;

/// Record that `user_id` follows `follow_user_id`.
pub async fn insert(pool: &MySqlPool, follow: &Follow) -> StoreResult<()> {
    sqlx::query("INSERT INTO tb_follow (user_id, follow_user_id, create_time) VALUES (?, ?, ?)")
        .bind(follow.user_id)
        .bind(follow.follow_user_id)
        .bind(follow.create_time)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a follow edge.
pub async fn delete(pool: &MySqlPool, user_id: i64, follow_user_id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM tb_follow WHERE user_id = ? AND follow_user_id = ?")
        .bind(user_id)
        .bind(follow_user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// All followers of an author. Drives feed fan-out on publish.
pub async fn followers_of(pool: &MySqlPool, followee_id: i64) -> StoreResult<Vec<Follow>> {
    let follows = sqlx::query_as::<_, Follow>("SELECT * FROM tb_follow WHERE follow_user_id = ?")
        .bind(followee_id)
        .fetch_all(pool)
        .await?;
    Ok(follows)
}

/// Whether the edge exists in the database.
pub async fn is_following(pool: &MySqlPool, user_id: i64, follow_user_id: i64) -> StoreResult<bool> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM tb_follow WHERE user_id = ? AND follow_user_id = ?")
            .bind(user_id)
            .bind(follow_user_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}
