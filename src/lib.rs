//! # LodeCache
//!
//! In-memory memcached-compatible cache server.
//!
//! ## Features
//!
//! - Memcached ASCII protocol support (GET, GETS, SET, CAS, DELETE)
//! - TTL support with lazy expiry on read and a background reaper
//! - CAS tokens for optimistic concurrency
//! - Byte budget enforced by an event-driven LRU manager
//! - Prometheus metrics endpoint
//! - Health check endpoints for load balancer integration
//!
//! ## Example
//!
//! ```ignore
//! use lodecache::cache::CacheService;
//! use lodecache::config::Config;
//!
//! // inside a tokio runtime: the reaper runs as a task
//! let config = Config::default();
//! let cache = CacheService::start(&config.cache)?;
//! cache.engine().set("k".into(), "v".into(), 0, 0);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌─────────────┐   ┌───────────┐
//! │ connection │──▶│ Decoder │──▶│ CacheEngine │──▶│ EventBus  │
//! │  (tokio)   │◀──│ Encoder │◀──│  (RwLock)   │   └─────┬─────┘
//! └────────────┘   └─────────┘   └──────▲──────┘         │
//!                                       │ destroy_keys   ├──▶ CacheStats
//!                                ┌──────┴──────┐         │
//!                                │ LruManager  │◀────────┘
//!                                │ (own thread)│
//!                                └─────────────┘
//! ```

// Modules
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use error::{CacheError, ErrorKind, LodeCacheError, ProtocolError, Result};
