//! # Account Utilities
//!
//! This module provides:
//! - Login verification codes: 6-digit random codes with a 2-minute TTL,
//!   consumed on successful verification
//! - Monthly sign-in calendars stored as Redis bitmaps, with the current
//!   consecutive-day streak derived via `BITFIELD`
//!
//! Session token issuance lives outside this crate; only the Redis-backed
//! pieces of the login flow are here.

use std::time::Duration;

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use redis::aio::ConnectionManager;
use regex::Regex;
use thiserror::Error;

use crate::cache::keys;

/// Account errors
#[derive(Error, Debug)]
pub enum AccountError {
    /// The phone number fails validation.
    #[error("invalid phone number")]
    InvalidPhone,

    /// Redis transport error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for account operations
pub type AccountResult<T> = Result<T, AccountError>;

/// Lifetime of a login verification code.
const LOGIN_CODE_TTL: Duration = Duration::from_secs(2 * 60);

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^1[3-9]\d{9}$").expect("phone pattern"));

/// Login codes and sign-in calendars.
pub struct Accounts {
    redis: ConnectionManager,
}

impl Accounts {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Issue a verification code for `phone` and store it for two minutes.
    /// Returns the code for the SMS dispatcher.
    pub async fn send_code(&self, phone: &str) -> AccountResult<String> {
        if !is_valid_phone(phone) {
            return Err(AccountError::InvalidPhone);
        }

        let code = generate_code();

        redis::cmd("SET")
            .arg(keys::login_code_key(phone))
            .arg(&code)
            .arg("EX")
            .arg(LOGIN_CODE_TTL.as_secs())
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;

        Ok(code)
    }

    /// Check a submitted code; a match consumes the stored code.
    pub async fn verify_code(&self, phone: &str, code: &str) -> AccountResult<bool> {
        if !is_valid_phone(phone) {
            return Err(AccountError::InvalidPhone);
        }

        let key = keys::login_code_key(phone);
        let stored: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut self.redis.clone())
            .await?;

        let matched = stored.as_deref() == Some(code);
        if matched {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<_, ()>(&mut self.redis.clone())
                .await?;
        }

        Ok(matched)
    }

    /// Mark today as signed in on the user's monthly bitmap.
    pub async fn sign_in(&self, user_id: i64) -> AccountResult<()> {
        let now = Utc::now();
        let key = keys::sign_key(user_id, now.year(), now.month());

        redis::cmd("SETBIT")
            .arg(key)
            .arg(i64::from(now.day()) - 1)
            .arg(1)
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;

        Ok(())
    }

    /// Consecutive signed-in days ending today.
    pub async fn sign_streak(&self, user_id: i64) -> AccountResult<u32> {
        let now = Utc::now();
        let key = keys::sign_key(user_id, now.year(), now.month());

        let words: Vec<i64> = redis::cmd("BITFIELD")
            .arg(key)
            .arg("GET")
            .arg(format!("u{}", now.day()))
            .arg(0)
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(words.first().map_or(0, |&word| trailing_sign_streak(word)))
    }
}

/// Mainland mobile number shape.
fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

/// A random 6-digit code.
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Count the run of 1-bits at the low end of the bitfield word. The word
/// holds the month's first `day` bits with today in the lowest position, so
/// the run length is the streak ending today.
fn trailing_sign_streak(word: i64) -> u32 {
    let mut num = word;
    let mut streak = 0;
    while num & 1 == 1 {
        streak += 1;
        num >>= 1;
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_validation() {
        assert!(is_valid_phone("13812345678"));
        assert!(is_valid_phone("19900001111"));
        assert!(!is_valid_phone("12812345678"));
        assert!(!is_valid_phone("1381234567"));
        assert!(!is_valid_phone("138123456789"));
        assert!(!is_valid_phone("phone"));
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.chars().next(), Some('0'));
        }
    }

    #[test]
    fn test_streak_counting() {
        // Signed in today only.
        assert_eq!(trailing_sign_streak(0b1), 1);
        // Three-day run ending today.
        assert_eq!(trailing_sign_streak(0b111), 3);
        // A gap yesterday breaks the run.
        assert_eq!(trailing_sign_streak(0b110), 0);
        // Earlier days do not extend a current run across a gap.
        assert_eq!(trailing_sign_streak(0b1011), 2);
        assert_eq!(trailing_sign_streak(0), 0);
    }
}
