//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use lodecache::prelude::*;
//! ```

// Error types
pub use crate::error::{CacheError, ErrorKind, LodeCacheError, ProtocolError, Result};

// Configuration
pub use crate::config::{CacheConfig, Config, MetricsConfig, ServerConfig};

// Cache
pub use crate::cache::{
    CacheEngine, CacheEntry, CacheEvent, CacheEventListener, CacheService, CacheStats,
    CacheValue, DeleteStatus, EventBus, LruManager, StoreStatus,
};

// Protocol
pub use crate::protocol::{CacheResult, Command, Decoder, ResponseWriter};

// Metrics
pub use crate::metrics::Metrics;

// Server
pub use crate::server::Server;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
