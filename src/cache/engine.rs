//! Concurrent cache engine
//!
//! A single `parking_lot::RwLock` guards the key map. Reads share the lock;
//! every mutation takes it exclusively and publishes exactly one event before
//! releasing it, so subscribers observe events in commit order.
//!
//! Conditional mutations (`cas`, `delete_key`) first check under the read
//! lock so that the common rejection path never blocks readers. A read guard
//! is never upgraded: it is dropped, the write guard is taken and the
//! condition is checked again, since another writer may have run in between.

use crate::cache::event::{CacheEvent, EventBus};
use crate::cache::value::{
    CacheEntry, CacheValue, Clock, StatsEntry, SystemClock, is_expired_at, normalize_ttl,
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Outcome of `set` / `cas`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Stored => "STORED",
            StoreStatus::NotStored => "NOT_STORED",
            StoreStatus::Exists => "EXISTS",
            StoreStatus::NotFound => "NOT_FOUND",
        }
    }
}

/// Outcome of `delete_key`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    NotFound,
}

impl DeleteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteStatus::Deleted => "DELETED",
            DeleteStatus::NotFound => "NOT_FOUND",
        }
    }
}

/// Entries removed by one `destroy_keys` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyedEntries {
    pub entries: Vec<StatsEntry>,
    pub total_bytes: u64,
}

impl DestroyedEntries {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_event(&self) -> CacheEvent {
        CacheEvent::DestroyBatch {
            entries: self.entries.clone(),
            total_bytes: self.total_bytes,
        }
    }
}

type KeyMap = HashMap<Bytes, CacheValue>;

/// In-memory key/value engine with TTL and CAS semantics
pub struct CacheEngine {
    map: RwLock<KeyMap>,
    cas_counter: AtomicU64,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl CacheEngine {
    /// Create an engine that publishes to `bus` and reads the wall clock
    pub fn new(bus: EventBus) -> Self {
        Self::with_clock(bus, Arc::new(SystemClock))
    }

    pub fn with_clock(bus: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            cas_counter: AtomicU64::new(0),
            bus,
            clock,
        }
    }

    /// Number of stored keys, including expired ones not yet reaped
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Get a live value by key
    pub fn get(&self, key: &[u8]) -> Option<CacheEntry> {
        let map = self.map.read();
        self.lookup(&map, key, self.clock.now())
    }

    /// Get live values for `keys`, in query order, omitting misses
    pub fn get_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<CacheEntry> {
        if keys.is_empty() {
            return Vec::new();
        }

        let map = self.map.read();
        let now = self.clock.now();
        keys.iter()
            .filter_map(|key| self.lookup(&map, key.as_ref(), now))
            .collect()
    }

    /// Store unconditionally, replacing any prior value
    pub fn set(&self, key: Bytes, data: Bytes, ttl: i64, flags: u16) -> StoreStatus {
        let now = self.clock.now();
        let expires_at = normalize_ttl(ttl, now);
        if is_expired_at(expires_at, now) {
            trace!(
                key = %String::from_utf8_lossy(&key),
                expires_at,
                "set rejected: expiry in the past"
            );
            return StoreStatus::NotStored;
        }

        let mut map = self.map.write();
        // time may have moved on while waiting for the lock
        let now = self.clock.now();
        if is_expired_at(expires_at, now) {
            return StoreStatus::NotStored;
        }

        let value = self.next_value(data, flags, now, expires_at);
        let new = StatsEntry::new(key.clone(), value.stats());
        let event = match map.insert(key.clone(), value) {
            Some(old) => CacheEvent::Update {
                old: StatsEntry::new(key, old.stats()),
                new,
            },
            None => CacheEvent::Put(new),
        };
        self.bus.publish(&event);

        StoreStatus::Stored
    }

    /// Store only if the live value still carries `cas_unique`
    pub fn cas(
        &self,
        key: Bytes,
        data: Bytes,
        ttl: i64,
        cas_unique: u64,
        flags: u16,
    ) -> StoreStatus {
        {
            let map = self.map.read();
            match live(&map, &key, self.clock.now()) {
                None => return StoreStatus::NotFound,
                Some(current) if current.cas_unique() != cas_unique => {
                    return StoreStatus::Exists;
                }
                Some(_) => {}
            }
        }

        let mut map = self.map.write();
        let now = self.clock.now();
        let old = match live(&map, &key, now) {
            None => return StoreStatus::NotFound,
            Some(current) if current.cas_unique() != cas_unique => return StoreStatus::Exists,
            Some(current) => current.stats(),
        };

        let value = self.next_value(data, flags, now, normalize_ttl(ttl, now));
        let new = StatsEntry::new(key.clone(), value.stats());
        map.insert(key.clone(), value);
        self.bus.publish(&CacheEvent::Update {
            old: StatsEntry::new(key, old),
            new,
        });

        StoreStatus::Stored
    }

    /// Delete a live key. Expired keys are left for the reaper.
    pub fn delete_key(&self, key: &[u8]) -> DeleteStatus {
        {
            let map = self.map.read();
            if live(&map, key, self.clock.now()).is_none() {
                return DeleteStatus::NotFound;
            }
        }

        let mut map = self.map.write();
        if live(&map, key, self.clock.now()).is_none() {
            return DeleteStatus::NotFound;
        }

        match map.remove_entry(key) {
            Some((key, value)) => {
                self.bus
                    .publish(&CacheEvent::Delete(StatsEntry::new(key, value.stats())));
                DeleteStatus::Deleted
            }
            None => DeleteStatus::NotFound,
        }
    }

    /// Remove `keys` regardless of expiry. Maintenance only, not client facing.
    ///
    /// Publishes exactly one `DestroyBatch` per call, listing the keys that
    /// were actually present.
    pub fn destroy_keys(&self, keys: &[Bytes]) -> DestroyedEntries {
        if keys.is_empty() {
            let destroyed = DestroyedEntries::default();
            self.bus.publish(&destroyed.to_event());
            return destroyed;
        }

        let mut map = self.map.write();
        let mut destroyed = DestroyedEntries {
            entries: Vec::with_capacity(keys.len()),
            total_bytes: 0,
        };
        for key in keys {
            if let Some((key, value)) = map.remove_entry(key) {
                destroyed.total_bytes += value.size();
                destroyed.entries.push(StatsEntry::new(key, value.stats()));
            }
        }
        self.bus.publish(&destroyed.to_event());

        destroyed
    }

    /// Keys whose values have expired. Read lock only.
    pub fn expired_keys(&self) -> Vec<Bytes> {
        let map = self.map.read();
        let now = self.clock.now();
        map.iter()
            .filter(|(_, value)| value.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// One reaper sweep: scan under the read lock, then destroy the batch.
    ///
    /// Returns the number of entries removed.
    pub fn reap_expired(&self) -> usize {
        let expired = self.expired_keys();
        if expired.is_empty() {
            return 0;
        }
        self.destroy_keys(&expired).len()
    }

    /// Must be called with the write lock held so tokens increase in commit order
    fn next_value(&self, data: Bytes, flags: u16, now: i64, expires_at: i64) -> CacheValue {
        let cas_unique = self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
        CacheValue::new(data, flags, now, expires_at, cas_unique)
    }

    /// Live lookup that reports a hit or a miss on the bus
    fn lookup(&self, map: &KeyMap, key: &[u8], now: i64) -> Option<CacheEntry> {
        match map.get_key_value(key) {
            Some((key, value)) if !value.is_expired(now) => {
                let entry = CacheEntry::new(key.clone(), value.clone());
                self.bus.publish(&CacheEvent::Hit(entry.to_stats()));
                Some(entry)
            }
            _ => {
                self.bus
                    .publish(&CacheEvent::Miss(Bytes::copy_from_slice(key)));
                None
            }
        }
    }
}

fn live<'a>(map: &'a KeyMap, key: &[u8], now: i64) -> Option<&'a CacheValue> {
    map.get(key).filter(|value| !value.is_expired(now))
}
