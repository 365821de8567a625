//! User queries over `tb_user`.

use sqlx::MySqlPool;

use crate::model::User;
use crate::store::{field_order_clause, id_list_literal, StoreResult};

/// Fetch one user by id.
pub async fn query_by_id(pool: &MySqlPool, id: i64) -> StoreResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM tb_user WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Fetch users by id, preserving the order of `ids`.
pub async fn query_by_ids(pool: &MySqlPool, ids: &[i64]) -> StoreResult<Vec<User>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM tb_user WHERE id IN {} ORDER BY {}",
        id_list_literal(ids),
        field_order_clause(ids)
    );
    let users = sqlx::query_as::<_, User>(&sql).fetch_all(pool).await?;
    Ok(users)
}
