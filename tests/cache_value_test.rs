//! Integration tests for the cache value contract: cached shops are plain
//! camelCase JSON, hot entries are wrapped in an envelope carrying their own
//! expiry, and the empty string stands for "known absent".

use bazaar::cache::shop_cache::CacheEnvelope;
use bazaar::model::Shop;
use chrono::{Duration, NaiveDate, Utc};

fn sample_shop(id: i64) -> Shop {
    Shop {
        id,
        name: "Quay Dumplings".to_string(),
        type_id: 4,
        images: "front.jpg".to_string(),
        area: "Riverside".to_string(),
        address: "88 Wharf Ave".to_string(),
        x: 121.5,
        y: 31.2,
        avg_price: 52,
        sold: 4200,
        comments: 312,
        score: 48,
        open_hours: "11:00-23:00".to_string(),
        create_time: NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
        update_time: NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
        distance: 0.0,
    }
}

#[test]
fn plain_cached_shop_round_trips_exactly() {
    let shop = sample_shop(9);

    let encoded = serde_json::to_string(&shop).unwrap();
    let decoded: Shop = serde_json::from_str(&encoded).unwrap();
    let re_encoded = serde_json::to_string(&decoded).unwrap();

    assert_eq!(decoded, shop);
    assert_eq!(re_encoded, encoded);
}

#[test]
fn negative_marker_is_distinguishable_from_payloads() {
    let marker = "";
    assert!(marker.is_empty());

    // A real payload never serializes to the empty string, so the marker
    // can never be confused with a cached shop.
    let encoded = serde_json::to_string(&sample_shop(10)).unwrap();
    assert!(!encoded.is_empty());

    // And the marker itself is not valid shop JSON.
    assert!(serde_json::from_str::<Shop>(marker).is_err());
}

#[test]
fn hot_entry_envelope_keeps_data_and_expiry() {
    let now = Utc::now();
    let envelope = CacheEnvelope {
        data: sample_shop(11),
        expire_time: now + Duration::seconds(10),
    };

    let encoded = serde_json::to_string(&envelope).unwrap();
    let decoded: CacheEnvelope<Shop> = serde_json::from_str(&encoded).unwrap();

    assert_eq!(decoded, envelope);
    assert!(decoded.is_fresh(now));
    assert!(!decoded.is_fresh(now + Duration::seconds(11)));
}

#[test]
fn stale_envelope_still_carries_usable_data() {
    let now = Utc::now();
    let envelope = CacheEnvelope {
        data: sample_shop(12),
        expire_time: now - Duration::seconds(1),
    };

    // Logical expiry is advisory: readers serve the payload regardless.
    assert!(!envelope.is_fresh(now));
    assert_eq!(envelope.data.id, 12);
}
