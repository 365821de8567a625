//! # BAZAAR - Local Review & Commerce Backend Core
//!
//! The caching, concurrency-control, and asynchronous order pipeline that
//! sits between HTTP handlers and the two backing stores (MySQL and Redis).
//!
//! ## Architecture
//!
//! - `config`: Environment-derived configuration
//! - `model`: Persistent entities and their JSON/row mappings
//! - `store`: Connection construction and SQL repositories
//! - `cache`: Membership filter, distributed lock, id generation, shop cache
//! - `orders`: Seckill gate and the stream-backed order pipeline
//! - `feed`: Fan-out-on-write feeds, likes, and the follow graph
//! - `accounts`: Login codes and sign-in calendars
//! - `stats`: Daily unique-visitor sketches

#![warn(clippy::all)]

// Configuration
pub mod config;

// Entities
pub mod model;

// Connections and repositories
pub mod store;

// Read-path caching, locking and id generation
pub mod cache;

// Flash-sale gate and order materialization
pub mod orders;

// Social feed fan-out
pub mod feed;

// User-facing account utilities
pub mod accounts;

// Traffic statistics
pub mod stats;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
