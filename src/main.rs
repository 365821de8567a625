//! BAZAAR - Local Review & Commerce Backend Core
//!
//! Service entry point. Wires the backing stores, preheats the shop
//! membership filter and the geo indexes, starts the logical-expire
//! refresher and the order-stream consumers, then parks until shutdown.

use std::sync::Arc;

use bazaar::cache::{BloomFilter, ShopCache};
use bazaar::cache::keys::SHOP_BLOOM_KEY;
use bazaar::config::Config;
use bazaar::orders::OrderPipeline;
use bazaar::{store, NAME, VERSION};

/// Expected shop cardinality for the membership filter.
const FILTER_CAPACITY: u64 = 100_000;

/// Target false-positive rate for the membership filter.
const FILTER_FP_RATE: f64 = 0.01;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("{} {} starting", NAME, VERSION);

    let config = Config::from_env();
    let db = store::connect_mysql(&config).await?;
    let redis = store::connect_redis(&config).await?;

    // The filter reports possibly-present for everything until the preheat
    // lands its first batch, so early traffic simply bypasses it.
    let bloom = Arc::new(BloomFilter::new(redis.clone(), SHOP_BLOOM_KEY, FILTER_CAPACITY, FILTER_FP_RATE));
    {
        let bloom = Arc::clone(&bloom);
        let db = db.clone();
        tokio::spawn(async move {
            if let Err(e) = bloom.preheat(&db).await {
                log::error!("membership filter preheat failed: {}", e);
            }
        });
    }

    let shop_cache = Arc::new(ShopCache::new(redis.clone(), db.clone(), Arc::clone(&bloom)));
    {
        let shop_cache = Arc::clone(&shop_cache);
        tokio::spawn(async move {
            if let Err(e) = shop_cache.preheat_geo_index().await {
                log::error!("geo index preheat failed: {}", e);
            }
        });
    }

    let pipeline = Arc::new(OrderPipeline::new(redis.clone(), db.clone()));
    pipeline.ensure_group().await?;
    pipeline.spawn_consumers();

    log::info!("background workers running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    log::info!("{} shutdown complete", NAME);
    Ok(())
}
