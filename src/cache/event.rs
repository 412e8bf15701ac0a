//! Cache lifecycle events and the synchronous bus that fans them out
//!
//! The bus runs every listener on the publishing thread, while the engine
//! still holds its lock. Listeners must return quickly; anything heavier
//! than an atomic update belongs on the listener's own queue (see
//! [`LruManager`](crate::cache::LruManager)).

use crate::cache::value::StatsEntry;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Something that happened to the cache. Events carry snapshots only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit(StatsEntry),
    Miss(Bytes),
    /// A key without a prior value was stored
    Put(StatsEntry),
    /// A key's value was replaced
    Update { old: StatsEntry, new: StatsEntry },
    Delete(StatsEntry),
    /// Bulk removal by the reaper or the LRU manager
    DestroyBatch {
        entries: Vec<StatsEntry>,
        total_bytes: u64,
    },
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit(_) => "hit",
            CacheEvent::Miss(_) => "miss",
            CacheEvent::Put(_) => "put",
            CacheEvent::Update { .. } => "update",
            CacheEvent::Delete(_) => "delete",
            CacheEvent::DestroyBatch { .. } => "destroy_batch",
        }
    }
}

/// Subscriber to cache events
pub trait CacheEventListener: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Fan-out of one event to every registered listener, in registration order
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn CacheEventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, used while composing the cache
    pub fn with_listener(mut self, listener: Arc<dyn CacheEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn subscribe(&mut self, listener: Arc<dyn CacheEventListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn publish(&self, event: &CacheEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
