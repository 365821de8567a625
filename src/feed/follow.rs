//! Follow graph with a Redis set mirror.

use chrono::Utc;
use redis::aio::ConnectionManager;
use sqlx::MySqlPool;

use crate::cache::keys;
use crate::feed::FeedResult;
use crate::model::{Follow, UserBrief};
use crate::store::{follow_repo, user_repo};

/// Follow/unfollow plus intersection queries.
pub struct FollowGraph {
    redis: ConnectionManager,
    db: MySqlPool,
}

impl FollowGraph {
    pub fn new(redis: ConnectionManager, db: MySqlPool) -> Self {
        Self { redis, db }
    }

    /// Record a follow edge and mirror it into the follower's set.
    ///
    /// The mirror write is best-effort; the database row is authoritative.
    pub async fn follow(&self, user_id: i64, followee_id: i64) -> FeedResult<()> {
        let edge = Follow {
            id: 0,
            user_id,
            follow_user_id: followee_id,
            create_time: Utc::now().naive_utc(),
        };
        follow_repo::insert(&self.db, &edge).await?;

        let added: Result<(), redis::RedisError> = redis::cmd("SADD")
            .arg(keys::follow_key(user_id))
            .arg(followee_id)
            .query_async(&mut self.redis.clone())
            .await;

        if let Err(e) = added {
            log::error!("failed to mirror follow {} -> {}: {}", user_id, followee_id, e);
        }

        Ok(())
    }

    /// Remove a follow edge and its set mirror.
    pub async fn unfollow(&self, user_id: i64, followee_id: i64) -> FeedResult<()> {
        follow_repo::delete(&self.db, user_id, followee_id).await?;

        let removed: Result<(), redis::RedisError> = redis::cmd("SREM")
            .arg(keys::follow_key(user_id))
            .arg(followee_id)
            .query_async(&mut self.redis.clone())
            .await;

        if let Err(e) = removed {
            log::error!("failed to unmirror follow {} -> {}: {}", user_id, followee_id, e);
        }

        Ok(())
    }

    /// Whether `user_id` follows `followee_id`.
    ///
    /// The set answers when reachable; on transport failure the database
    /// decides, and a positive answer re-warms the set.
    pub async fn is_following(&self, user_id: i64, followee_id: i64) -> FeedResult<bool> {
        let mirrored: Result<bool, redis::RedisError> = redis::cmd("SISMEMBER")
            .arg(keys::follow_key(user_id))
            .arg(followee_id)
            .query_async(&mut self.redis.clone())
            .await;

        if let Ok(answer) = mirrored {
            return Ok(answer);
        }

        let follows = follow_repo::is_following(&self.db, user_id, followee_id).await?;

        if follows {
            let rewarmed: Result<(), redis::RedisError> = redis::cmd("SADD")
                .arg(keys::follow_key(user_id))
                .arg(followee_id)
                .query_async(&mut self.redis.clone())
                .await;

            if let Err(e) = rewarmed {
                log::error!("failed to re-warm follow set of user {}: {}", user_id, e);
            }
        }

        Ok(follows)
    }

    /// Users both sides follow, via set intersection.
    pub async fn common_follows(&self, user_id: i64, other_id: i64) -> FeedResult<Vec<UserBrief>> {
        let members: Vec<String> = redis::cmd("SINTER")
            .arg(keys::follow_key(user_id))
            .arg(keys::follow_key(other_id))
            .query_async(&mut self.redis.clone())
            .await?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = members.iter().filter_map(|m| m.parse().ok()).collect();
        let users = user_repo::query_by_ids(&self.db, &ids).await?;

        Ok(users.iter().map(UserBrief::from).collect())
    }
}
