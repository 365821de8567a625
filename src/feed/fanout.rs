//! Blog publishing, feed retrieval and likes.

use chrono::Utc;
use redis::aio::ConnectionManager;
use sqlx::MySqlPool;

use crate::cache::keys;
use crate::feed::{FeedError, FeedResult, ScrollResult};
use crate::model::{Blog, UserBrief};
use crate::store::{blog_repo, follow_repo, user_repo};

/// How many of the earliest likers are surfaced.
const TOP_LIKERS: isize = 5;

/// Blog feed operations over the per-follower sorted-set inboxes.
pub struct BlogFeed {
    redis: ConnectionManager,
    db: MySqlPool,
}

impl BlogFeed {
    pub fn new(redis: ConnectionManager, db: MySqlPool) -> Self {
        Self { redis, db }
    }

    /// Insert a blog and fan its id out to every follower's inbox.
    ///
    /// Fan-out failures are per-follower and non-fatal: the publish stands
    /// even if some inboxes miss the entry.
    pub async fn publish_blog(&self, author_id: i64, blog: &mut Blog) -> FeedResult<i64> {
        let now = Utc::now().naive_utc();
        blog.user_id = author_id;
        blog.create_time = now;
        blog.update_time = now;

        blog_repo::insert(&self.db, blog).await?;

        let followers = follow_repo::followers_of(&self.db, author_id).await?;
        let score = Utc::now().timestamp();

        for follower in &followers {
            let pushed: Result<(), redis::RedisError> = redis::cmd("ZADD")
                .arg(keys::feed_key(follower.user_id))
                .arg(score)
                .arg(blog.id)
                .query_async(&mut self.redis.clone())
                .await;

            if let Err(e) = pushed {
                log::warn!("failed to push blog {} to feed of user {}: {}", blog.id, follower.user_id, e);
            }
        }

        Ok(blog.id)
    }

    /// One page of the reader's feed, newest first.
    ///
    /// `max_time` and `offset` come from the previous page's result (or
    /// `now, 0` for the first page); the returned cursor continues the
    /// scroll across entries that share a publish second.
    pub async fn query_blog_of_follow(
        &self,
        reader_id: i64,
        max_time: i64,
        offset: u32,
        page_size: u32,
    ) -> FeedResult<ScrollResult<Blog>> {
        let entries: Vec<(String, f64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(keys::feed_key(reader_id))
            .arg(max_time)
            .arg(0)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(offset)
            .arg(page_size)
            .query_async(&mut self.redis.clone())
            .await?;

        if entries.is_empty() {
            return Ok(ScrollResult {
                data: Vec::new(),
                min_time: 0,
                offset: 0,
            });
        }

        let mut ids = Vec::with_capacity(entries.len());
        let mut scores = Vec::with_capacity(entries.len());
        for (member, score) in &entries {
            if let Ok(id) = member.parse::<i64>() {
                ids.push(id);
                scores.push(*score as i64);
            }
        }

        let (min_time, tie_count) = scroll_cursor(&scores);

        let blogs = blog_repo::query_by_ids(&self.db, &ids).await?;
        let data = self.hydrate_blogs(blogs, reader_id).await;

        Ok(ScrollResult {
            data,
            min_time,
            offset: tie_count,
        })
    }

    /// Toggle the reader's like on a blog.
    ///
    /// The database counter moves first, then the sorted set; a crash in
    /// between leaves a drift that the reconcile job corrects.
    pub async fn like_blog(&self, blog_id: i64, user_id: i64) -> FeedResult<()> {
        let key = keys::blog_like_key(blog_id);

        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(&key)
            .arg(user_id)
            .query_async(&mut self.redis.clone())
            .await?;

        if score.is_none() {
            blog_repo::incr_liked(&self.db, blog_id).await?;
            redis::cmd("ZADD")
                .arg(&key)
                .arg(Utc::now().timestamp())
                .arg(user_id)
                .query_async::<_, ()>(&mut self.redis.clone())
                .await?;
        } else {
            blog_repo::decr_liked(&self.db, blog_id).await?;
            redis::cmd("ZREM")
                .arg(&key)
                .arg(user_id)
                .query_async::<_, ()>(&mut self.redis.clone())
                .await?;
        }

        Ok(())
    }

    /// The five earliest likers of a blog, in like order.
    pub async fn query_blog_likes(&self, blog_id: i64) -> FeedResult<Vec<UserBrief>> {
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(keys::blog_like_key(blog_id))
            .arg(0)
            .arg(TOP_LIKERS - 1)
            .query_async(&mut self.redis.clone())
            .await?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = members.iter().filter_map(|m| m.parse().ok()).collect();
        let users = user_repo::query_by_ids(&self.db, &ids).await?;

        Ok(users.iter().map(UserBrief::from).collect())
    }

    /// One blog with its author fields filled.
    pub async fn query_blog_by_id(&self, id: i64) -> FeedResult<Blog> {
        let mut blog = blog_repo::query_by_id(&self.db, id)
            .await?
            .ok_or(FeedError::BlogNotFound(id))?;

        let author = user_repo::query_by_id(&self.db, blog.user_id)
            .await?
            .ok_or(FeedError::UserNotFound(blog.user_id))?;

        blog.name = author.nick_name;
        blog.icon = author.icon;
        Ok(blog)
    }

    /// Page of the most-liked blogs with author fields filled.
    pub async fn query_hot_blogs(&self, current: u32) -> FeedResult<Vec<Blog>> {
        let blogs = blog_repo::page_hot(&self.db, current).await?;

        let mut hydrated = Vec::with_capacity(blogs.len());
        for mut blog in blogs {
            match user_repo::query_by_id(&self.db, blog.user_id).await {
                Ok(Some(author)) => {
                    blog.name = author.nick_name;
                    blog.icon = author.icon;
                }
                Ok(None) => log::warn!("author {} of blog {} not found", blog.user_id, blog.id),
                Err(e) => log::warn!("failed to load author {} for blog {}: {}", blog.user_id, blog.id, e),
            }
            hydrated.push(blog);
        }

        Ok(hydrated)
    }

    /// Page of one author's blogs.
    pub async fn query_my_blogs(&self, user_id: i64, current: u32) -> FeedResult<Vec<Blog>> {
        Ok(blog_repo::page_by_user(&self.db, user_id, current).await?)
    }

    /// Fill `{icon, name}` from each author and `is_like` from the reader's
    /// like membership, one concurrent task per blog.
    async fn hydrate_blogs(&self, blogs: Vec<Blog>, reader_id: i64) -> Vec<Blog> {
        futures::future::join_all(blogs.into_iter().map(|mut blog| {
            let db = self.db.clone();
            let mut redis = self.redis.clone();

            async move {
                match user_repo::query_by_id(&db, blog.user_id).await {
                    Ok(Some(author)) => {
                        blog.name = author.nick_name;
                        blog.icon = author.icon;
                    }
                    Ok(None) => log::warn!("author {} of blog {} not found", blog.user_id, blog.id),
                    Err(e) => log::warn!("failed to load author for blog {}: {}", blog.id, e),
                }

                let score: Result<Option<f64>, redis::RedisError> = redis::cmd("ZSCORE")
                    .arg(keys::blog_like_key(blog.id))
                    .arg(reader_id)
                    .query_async(&mut redis)
                    .await;

                blog.is_like = matches!(score, Ok(Some(_)));
                blog
            }
        }))
        .await
    }
}

/// The scroll cursor for one page of descending scores: the page minimum
/// and how many entries share it.
fn scroll_cursor(scores: &[i64]) -> (i64, u32) {
    let mut min_time = 0i64;
    let mut tie_count = 0u32;

    for &score in scores {
        if score == min_time {
            tie_count += 1;
        } else {
            min_time = score;
            tie_count = 1;
        }
    }

    (min_time, tie_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cursor_counts_minimum_ties() {
        // Three posts at 1000, one at 999, page size 2: first page ends on
        // two entries scored 1000.
        assert_eq!(scroll_cursor(&[1000, 1000]), (1000, 2));
        // Second page: one more 1000 then the 999 entry.
        assert_eq!(scroll_cursor(&[1000, 999]), (999, 1));
    }

    #[test]
    fn test_cursor_all_equal_page() {
        assert_eq!(scroll_cursor(&[500, 500, 500, 500, 500]), (500, 5));
    }

    #[test]
    fn test_cursor_distinct_scores() {
        assert_eq!(scroll_cursor(&[1003, 1002, 1001]), (1001, 1));
    }

    #[test]
    fn test_cursor_empty_page() {
        assert_eq!(scroll_cursor(&[]), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_cursor_invariants(mut scores in proptest::collection::vec(1i64..2_000_000_000, 1..50)) {
            // Feed pages arrive score-descending.
            scores.sort_unstable_by(|a, b| b.cmp(a));

            let (min_time, tie_count) = scroll_cursor(&scores);
            let min = *scores.last().unwrap();
            let multiplicity = scores.iter().filter(|&&s| s == min).count() as u32;

            prop_assert_eq!(min_time, min);
            prop_assert_eq!(tie_count, multiplicity);
            prop_assert!(tie_count as usize <= scores.len());
        }
    }
}
