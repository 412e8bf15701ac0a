//! In-memory cache: engine, event bus, LRU eviction, reaper and stats
//!
//! [`CacheService`] is the composition root. It builds the bus with its
//! subscribers before the engine exists, then starts the background parts
//! explicitly once the engine is shared.

pub mod engine;
pub mod event;
pub mod lru;
pub mod reaper;
pub mod stats;
pub mod value;

#[cfg(test)]
pub(crate) mod test_utils;

pub use engine::{CacheEngine, DeleteStatus, DestroyedEntries, StoreStatus};
pub use event::{CacheEvent, CacheEventListener, EventBus};
pub use lru::{Evictor, LruList, LruManager, LruSnapshot};
pub use reaper::Reaper;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use value::{CacheEntry, CacheValue, Clock, StatsEntry, SystemClock, ValueStats};

use crate::config::CacheConfig;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Engine plus everything that hangs off its event bus
pub struct CacheService {
    engine: Arc<CacheEngine>,
    stats: Arc<CacheStats>,
    lru: Option<Arc<LruManager>>,
    reaper: Option<Reaper>,
}

impl CacheService {
    pub fn start(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    /// Build and start the cache. The LRU manager is only wired in when
    /// `max_bytes` is non-zero, the reaper only when the interval is. The
    /// reaper runs on the current tokio runtime.
    pub fn start_with_clock(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let stats = Arc::new(CacheStats::new());
        let mut bus = EventBus::new().with_listener(stats.clone());

        let lru = (config.max_bytes > 0)
            .then(|| Arc::new(LruManager::new(config.max_bytes, config.lru_recovery_pct)));
        if let Some(lru) = &lru {
            bus.subscribe(lru.clone());
        }

        let engine = Arc::new(CacheEngine::with_clock(bus, clock));

        if let Some(lru) = &lru {
            lru.start(&engine)?;
        }

        let reaper = if config.reap_interval_secs > 0 {
            let interval = Duration::from_secs(config.reap_interval_secs);
            Some(Reaper::spawn(Arc::clone(&engine), interval)?)
        } else {
            None
        };

        info!(
            max_bytes = config.max_bytes,
            lru_enabled = lru.is_some(),
            reap_interval_secs = config.reap_interval_secs,
            "Cache started"
        );

        Ok(Self {
            engine,
            stats,
            lru,
            reaper,
        })
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn lru(&self) -> Option<&Arc<LruManager>> {
        self.lru.as_ref()
    }

    /// Stop the reaper. The LRU consumer exits on its own once the engine
    /// and every other handle to the manager are dropped.
    pub async fn shutdown(&mut self) {
        if let Some(mut reaper) = self.reaper.take() {
            reaper.stop().await;
        }
    }
}
