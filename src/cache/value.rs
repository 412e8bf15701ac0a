//! Cache values, stats projections and TTL handling
//!
//! TTL Rules (memcached-compatible):
//! - 0 = never expire
//! - <= 2592000 (30 days) = relative seconds from now (negative values land in the past)
//! - > 2592000 = absolute Unix timestamp

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum relative TTL value (30 days in seconds)
pub const MAX_RELATIVE_TTL: i64 = 2_592_000;

/// Source of "now" in epoch seconds
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        current_timestamp()
    }
}

/// Payload-free projection of a value, the only form that reaches event subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueStats {
    pub created_at: i64,
    pub expires_at: i64,
    /// Payload length in bytes
    pub size: u64,
}

impl ValueStats {
    pub fn is_expired(&self, now: i64) -> bool {
        is_expired_at(self.expires_at, now)
    }
}

/// Stored value with metadata. Never mutated once inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue {
    data: Bytes,
    flags: u16,
    cas_unique: u64,
    stats: ValueStats,
}

impl CacheValue {
    /// Create a value whose expiry has already been normalized
    pub fn new(data: Bytes, flags: u16, created_at: i64, expires_at: i64, cas_unique: u64) -> Self {
        let size = data.len() as u64;
        Self {
            data,
            flags,
            cas_unique,
            stats: ValueStats {
                created_at,
                expires_at,
                size,
            },
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn cas_unique(&self) -> u64 {
        self.cas_unique
    }

    pub fn created_at(&self) -> i64 {
        self.stats.created_at
    }

    pub fn expires_at(&self) -> i64 {
        self.stats.expires_at
    }

    pub fn size(&self) -> u64 {
        self.stats.size
    }

    pub fn stats(&self) -> ValueStats {
        self.stats
    }

    /// Check if the value has expired relative to `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.stats.is_expired(now)
    }
}

/// Key plus value, as returned by retrievals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Bytes,
    pub value: CacheValue,
}

impl CacheEntry {
    pub fn new(key: Bytes, value: CacheValue) -> Self {
        Self { key, value }
    }

    pub fn to_stats(&self) -> StatsEntry {
        StatsEntry {
            key: self.key.clone(),
            stats: self.value.stats(),
        }
    }
}

/// Key plus stats snapshot, carried by cache events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsEntry {
    pub key: Bytes,
    pub stats: ValueStats,
}

impl StatsEntry {
    pub fn new(key: Bytes, stats: ValueStats) -> Self {
        Self { key, stats }
    }
}

/// Convert a raw memcached exptime into an absolute expiry (0 = never)
pub fn normalize_ttl(ttl: i64, now: i64) -> i64 {
    if ttl == 0 {
        0
    } else if ttl <= MAX_RELATIVE_TTL {
        now.saturating_add(ttl)
    } else {
        ttl
    }
}

/// `expires_at != 0 && expires_at < now`
#[inline]
pub fn is_expired_at(expires_at: i64, now: i64) -> bool {
    expires_at != 0 && expires_at < now
}

/// Get the current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
