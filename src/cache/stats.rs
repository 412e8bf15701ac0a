//! Hit/miss/item/size counters fed by the event bus

use crate::cache::event::{CacheEvent, CacheEventListener};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub items: i64,
    pub size: i64,
}

/// Metrics collector. Every update is a single relaxed atomic, cheap enough
/// to run inline on the engine's publishing thread.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    // signed: a destroy racing a put may briefly drive these below zero
    items: AtomicI64,
    size: AtomicI64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn items(&self) -> i64 {
        self.items.load(Ordering::Relaxed)
    }

    /// Total payload bytes currently stored
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            items: self.items(),
            size: self.size(),
        }
    }
}

impl CacheEventListener for CacheStats {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Hit(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Miss(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Put(entry) => {
                self.items.fetch_add(1, Ordering::Relaxed);
                self.size
                    .fetch_add(entry.stats.size as i64, Ordering::Relaxed);
            }
            CacheEvent::Update { old, new } => {
                let delta = new.stats.size as i64 - old.stats.size as i64;
                self.size.fetch_add(delta, Ordering::Relaxed);
            }
            CacheEvent::Delete(entry) => {
                self.items.fetch_sub(1, Ordering::Relaxed);
                self.size
                    .fetch_sub(entry.stats.size as i64, Ordering::Relaxed);
            }
            CacheEvent::DestroyBatch {
                entries,
                total_bytes,
            } => {
                self.items
                    .fetch_sub(entries.len() as i64, Ordering::Relaxed);
                self.size
                    .fetch_sub(*total_bytes as i64, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::engine::CacheEngine;
    use crate::cache::event::EventBus;
    use bytes::Bytes;
    use std::sync::Arc;

    fn engine_with_stats() -> (CacheEngine, Arc<CacheStats>) {
        let stats = Arc::new(CacheStats::new());
        let engine = CacheEngine::new(EventBus::new().with_listener(stats.clone()));
        (engine, stats)
    }

    #[test]
    fn test_hits_and_misses() {
        let (engine, stats) = engine_with_stats();
        engine.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 0, 0);
        engine.get(b"k");
        engine.get(b"k");
        engine.get(b"nope");

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
    }

    #[test]
    fn test_items_and_size_follow_mutations() {
        let (engine, stats) = engine_with_stats();
        engine.set(Bytes::from_static(b"a"), Bytes::from_static(b"12345"), 0, 0);
        engine.set(Bytes::from_static(b"b"), Bytes::from_static(b"123"), 0, 0);
        assert_eq!(stats.snapshot(), CacheStatsSnapshot { hits: 0, misses: 0, items: 2, size: 8 });

        // replacing a value only moves the size
        engine.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"), 0, 0);
        assert_eq!(stats.items(), 2);
        assert_eq!(stats.size(), 4);

        engine.delete_key(b"b");
        assert_eq!(stats.items(), 1);
        assert_eq!(stats.size(), 1);

        engine.destroy_keys(&[Bytes::from_static(b"a")]);
        assert_eq!(stats.items(), 0);
        assert_eq!(stats.size(), 0);
    }
}
