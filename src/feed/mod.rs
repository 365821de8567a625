//! # Feed Fan-Out and the Follow Graph
//!
//! This module provides:
//! - Fan-out-on-write: publishing a blog pushes its id into every
//!   follower's sorted-set inbox, scored by publish time
//! - Cursor-paginated feed retrieval with tie-aware offsets, so pages that
//!   end on equal scores neither skip nor duplicate entries
//! - Like toggling and "who liked first" lookups
//! - Follow/unfollow with a Redis set mirror for intersection queries

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feed subsystem errors
#[derive(Error, Debug)]
pub enum FeedError {
    /// The blog does not exist.
    #[error("blog {0} not found")]
    BlogNotFound(i64),

    /// The user does not exist.
    #[error("user {0} not found")]
    UserNotFound(i64),

    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Repository error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// One page of a scrolled feed, plus the cursor for the next page.
///
/// `offset` counts the entries of this page whose score equals `min_time`;
/// passing both back skips exactly the already-seen tied entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollResult<T> {
    pub data: Vec<T>,
    pub min_time: i64,
    pub offset: u32,
}

pub mod fanout;
pub mod follow;

pub use fanout::BlogFeed;
pub use follow::FollowGraph;
