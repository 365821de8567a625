//! Redis key schema, centralized.

/// Login verification codes, 2-minute TTL.
pub const LOGIN_CODE_KEY: &str = "login:code:";
/// Cached shop values.
pub const CACHE_SHOP_KEY: &str = "cache:shop:";
/// Cached shop-type list.
pub const CACHE_SHOP_LIST: &str = "shop:list";
/// Cold-start rebuild locks for shop entries.
pub const SHOP_LOCK_KEY: &str = "shop:lock:";
/// Seckill stock counters.
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";
/// Per-blog like sets.
pub const BLOG_LIKE_KEY: &str = "blog:like:";
/// Per-user followee sets.
pub const FOLLOW_USER_KEY: &str = "follow:";
/// Per-follower feed inboxes.
pub const FEED_KEY: &str = "feed:";
/// Geospatial shop indexes, one per type.
pub const SHOP_GEO_KEY: &str = "shop:geo:";
/// Monthly sign-in bitmaps.
pub const USER_SIGN_KEY: &str = "sign:";
/// Order materialization locks.
pub const ORDER_LOCK_KEY: &str = "lock:order:";
/// Daily unique-visitor sketches.
pub const UV_KEY: &str = "uv:";
/// Daily id-generator counters.
pub const ID_COUNTER_KEY: &str = "icr:";

/// Shop membership filter bitset.
pub const SHOP_BLOOM_KEY: &str = "bloom:shop";

pub fn shop_cache_key(id: i64) -> String {
    format!("{}{}", CACHE_SHOP_KEY, id)
}

pub fn shop_lock_key(id: i64) -> String {
    format!("{}{}", SHOP_LOCK_KEY, id)
}

pub fn shop_geo_key(type_id: i64) -> String {
    format!("{}{}", SHOP_GEO_KEY, type_id)
}

pub fn seckill_stock_key(voucher_id: i64) -> String {
    format!("{}{}", SECKILL_STOCK_KEY, voucher_id)
}

pub fn order_lock_key(user_id: i64) -> String {
    format!("{}{}", ORDER_LOCK_KEY, user_id)
}

pub fn blog_like_key(blog_id: i64) -> String {
    format!("{}{}", BLOG_LIKE_KEY, blog_id)
}

pub fn follow_key(user_id: i64) -> String {
    format!("{}{}", FOLLOW_USER_KEY, user_id)
}

pub fn feed_key(user_id: i64) -> String {
    format!("{}{}", FEED_KEY, user_id)
}

/// `sign:<userId>:<YYYYMM>`
pub fn sign_key(user_id: i64, year: i32, month: u32) -> String {
    format!("{}{}:{:04}{:02}", USER_SIGN_KEY, user_id, year, month)
}

/// `uv:<YYYYMMDD>`
pub fn uv_key(date: &str) -> String {
    format!("{}{}", UV_KEY, date)
}

/// `retry:<stream>:<messageId>`
pub fn retry_key(stream: &str, message_id: &str) -> String {
    format!("retry:{}:{}", stream, message_id)
}

pub fn login_code_key(phone: &str) -> String {
    format!("{}{}", LOGIN_CODE_KEY, phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(shop_cache_key(17), "cache:shop:17");
        assert_eq!(shop_lock_key(17), "shop:lock:17");
        assert_eq!(shop_geo_key(3), "shop:geo:3");
        assert_eq!(seckill_stock_key(42), "seckill:stock:42");
        assert_eq!(order_lock_key(5), "lock:order:5");
        assert_eq!(blog_like_key(8), "blog:like:8");
        assert_eq!(feed_key(21), "feed:21");
        assert_eq!(sign_key(5, 2024, 6), "sign:5:202406");
        assert_eq!(retry_key("stream.orders", "1-0"), "retry:stream.orders:1-0");
    }
}
