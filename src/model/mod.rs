//! Persistent entities and their wire mappings
//!
//! Every entity carries two mappings:
//! - serde (camelCase JSON) — the cache value encoding and the API shape
//! - sqlx `FromRow` — the MySQL row shape (snake_case columns)
//!
//! Fields derived at read time (`distance`, `icon`, `name`, `isLike`,
//! seckill overlays on `Voucher`) are not persisted and default to empty.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Order lifecycle states as stored in `tb_voucher_order.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Unpaid,
    Paid,
    Used,
    Canceled,
    Refunding,
    Refunded,
}

impl OrderStatus {
    /// Database column value.
    pub fn as_i32(self) -> i32 {
        match self {
            OrderStatus::Unpaid => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Used => 3,
            OrderStatus::Canceled => 4,
            OrderStatus::Refunding => 5,
            OrderStatus::Refunded => 6,
        }
    }

    /// Decode a column value; unknown values return `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(OrderStatus::Unpaid),
            2 => Some(OrderStatus::Paid),
            3 => Some(OrderStatus::Used),
            4 => Some(OrderStatus::Canceled),
            5 => Some(OrderStatus::Refunding),
            6 => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

/// Payment channels for voucher orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayType {
    Balance,
    Alipay,
    Wechat,
}

impl PayType {
    /// Database column value.
    pub fn as_i32(self) -> i32 {
        match self {
            PayType::Balance => 1,
            PayType::Alipay => 2,
            PayType::Wechat => 3,
        }
    }
}

/// A shop record. `(x, y)` is a WGS-84 lon/lat pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    pub images: String,
    pub area: String,
    pub address: String,
    pub x: f64,
    pub y: f64,
    pub avg_price: i64,
    pub sold: i32,
    pub comments: i32,
    pub score: i32,
    pub open_hours: String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
    /// Distance from the query point in meters; derived, never persisted.
    #[serde(default)]
    #[sqlx(default)]
    pub distance: f64,
}

/// A shop category used for the home-page type list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopType {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub sort: i32,
    #[serde(skip)]
    pub create_time: Option<NaiveDateTime>,
    #[serde(skip)]
    pub update_time: Option<NaiveDateTime>,
}

/// A voucher row. Seckill-only fields are overlaid from `tb_seckill_voucher`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub id: i64,
    pub shop_id: i64,
    pub title: String,
    pub sub_title: String,
    pub rules: String,
    pub pay_value: i64,
    pub actual_value: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub voucher_type: i32,
    pub status: i32,
    #[sqlx(default)]
    pub stock: i32,
    #[sqlx(default)]
    pub begin_time: Option<NaiveDateTime>,
    #[sqlx(default)]
    pub end_time: Option<NaiveDateTime>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

/// Voucher type marker for flash-sale vouchers.
pub const VOUCHER_TYPE_SECKILL: i32 = 1;

/// Stock and sale window for a flash-sale voucher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SeckillVoucher {
    pub voucher_id: i64,
    pub stock: i32,
    pub create_time: NaiveDateTime,
    pub begin_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

/// A materialized voucher purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    pub id: i64,
    pub user_id: i64,
    pub voucher_id: i64,
    pub pay_type: i32,
    pub status: i32,
    pub create_time: NaiveDateTime,
    pub pay_time: Option<NaiveDateTime>,
    pub use_time: Option<NaiveDateTime>,
    pub refund_time: Option<NaiveDateTime>,
    pub update_time: NaiveDateTime,
}

impl VoucherOrder {
    /// A fresh unpaid order, as produced by the seckill gate.
    pub fn unpaid(id: i64, user_id: i64, voucher_id: i64, now: NaiveDateTime) -> Self {
        Self {
            id,
            user_id,
            voucher_id,
            pay_type: PayType::Balance.as_i32(),
            status: OrderStatus::Unpaid.as_i32(),
            create_time: now,
            pay_time: None,
            use_time: None,
            refund_time: None,
            update_time: now,
        }
    }
}

/// A follow edge: `user_id` follows `follow_user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: i64,
    pub user_id: i64,
    pub follow_user_id: i64,
    pub create_time: NaiveDateTime,
}

/// A blog post. `icon`/`name`/`is_like` are filled from the author and the
/// reader's like set at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Blog {
    pub id: i64,
    pub shop_id: i64,
    pub user_id: i64,
    #[serde(default)]
    #[sqlx(default)]
    pub icon: String,
    #[serde(default)]
    #[sqlx(default)]
    pub name: String,
    #[serde(default)]
    #[sqlx(default)]
    pub is_like: bool,
    pub title: String,
    pub images: String,
    pub content: String,
    pub liked: i32,
    pub comments: i32,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub phone: String,
    #[serde(skip)]
    pub password: String,
    pub nick_name: String,
    pub icon: String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

/// The public slice of a user handed out in feeds and like lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBrief {
    pub id: i64,
    pub nick_name: String,
    pub icon: String,
}

impl From<&User> for UserBrief {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            nick_name: user.nick_name.clone(),
            icon: user.icon.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_order_status_round_trip() {
        for status in [
            OrderStatus::Unpaid,
            OrderStatus::Paid,
            OrderStatus::Used,
            OrderStatus::Canceled,
            OrderStatus::Refunding,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::from_i32(status.as_i32()), Some(status));
        }
        assert_eq!(OrderStatus::from_i32(0), None);
        assert_eq!(OrderStatus::from_i32(7), None);
    }

    #[test]
    fn test_shop_json_round_trip() {
        let shop = Shop {
            id: 9,
            name: "Harbor Noodles".to_string(),
            type_id: 3,
            images: "a.jpg,b.jpg".to_string(),
            area: "Dockside".to_string(),
            address: "12 Pier Rd".to_string(),
            x: 121.47,
            y: 31.23,
            avg_price: 45,
            sold: 1200,
            comments: 88,
            score: 47,
            open_hours: "10:00-22:00".to_string(),
            create_time: sample_time(),
            update_time: sample_time(),
            distance: 0.0,
        };

        let encoded = serde_json::to_string(&shop).unwrap();
        assert!(encoded.contains("\"typeId\":3"));
        assert!(encoded.contains("\"openHours\""));

        let decoded: Shop = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, shop);
    }

    #[test]
    fn test_unpaid_order_defaults() {
        let order = VoucherOrder::unpaid(77, 5, 42, sample_time());
        assert_eq!(order.status, OrderStatus::Unpaid.as_i32());
        assert_eq!(order.pay_type, PayType::Balance.as_i32());
        assert!(order.pay_time.is_none());
        assert_eq!(order.create_time, order.update_time);
    }

    #[test]
    fn test_voucher_type_field_rename() {
        let voucher = Voucher {
            id: 1,
            shop_id: 2,
            title: "50 off".to_string(),
            sub_title: String::new(),
            rules: String::new(),
            pay_value: 4500,
            actual_value: 5000,
            voucher_type: VOUCHER_TYPE_SECKILL,
            status: 1,
            stock: 100,
            begin_time: Some(sample_time()),
            end_time: Some(sample_time()),
            create_time: sample_time(),
            update_time: sample_time(),
        };

        let encoded = serde_json::to_string(&voucher).unwrap();
        assert!(encoded.contains("\"type\":1"));
        assert!(!encoded.contains("voucherType"));
    }
}
