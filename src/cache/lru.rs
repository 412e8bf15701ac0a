//! LRU eviction manager
//!
//! The manager subscribes to the event bus but does no work on the
//! publisher's thread: `on_event` only pushes onto an unbounded queue. A
//! single consumer thread drains that queue in order and is the only code
//! that ever touches the recency list, so the list needs no locking.
//!
//! When the tracked payload size goes over `max_bytes`, the consumer walks
//! from the least recently used end until it has collected at least
//! `max_bytes * recovery_pct / 100` bytes and asks the engine to destroy
//! those keys. Freeing a percentage rather than the bare overshoot keeps
//! the next few inserts from each triggering another eviction.

use crate::cache::engine::{CacheEngine, DestroyedEntries};
use crate::cache::event::{CacheEvent, CacheEventListener};
use crate::cache::value::ValueStats;
use crate::error::CacheError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Bulk removal target for the LRU consumer
pub trait Evictor: Send + Sync {
    fn evict(&self, keys: &[Bytes]) -> DestroyedEntries;
}

impl Evictor for CacheEngine {
    fn evict(&self, keys: &[Bytes]) -> DestroyedEntries {
        self.destroy_keys(keys)
    }
}

type Handle = usize;

#[derive(Debug)]
struct Node {
    key: Bytes,
    stats: ValueStats,
    prev: Option<Handle>,
    next: Option<Handle>,
}

/// Doubly linked recency list stored in an arena.
///
/// Links are arena handles rather than pointers; freed slots are recycled.
/// Head is the most recently used entry, tail the least.
#[derive(Debug, Default)]
pub struct LruList {
    slots: Vec<Option<Node>>,
    free: Vec<Handle>,
    index: HashMap<Bytes, Handle>,
    head: Option<Handle>,
    tail: Option<Handle>,
    total_size: u64,
}

impl LruList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of the tracked payload sizes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Insert at the head. Returns false if the key is already tracked.
    pub fn insert(&mut self, key: Bytes, stats: ValueStats) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }

        let node = Node {
            key: key.clone(),
            stats,
            prev: None,
            next: None,
        };
        let handle = match self.free.pop() {
            Some(handle) => {
                self.slots[handle] = Some(node);
                handle
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, handle);
        self.link_front(handle);
        self.total_size += stats.size;
        true
    }

    /// Move a key to the head, optionally replacing its stats snapshot.
    /// Returns false if the key is not tracked.
    pub fn touch(&mut self, key: &[u8], stats: Option<ValueStats>) -> bool {
        let Some(&handle) = self.index.get(key) else {
            return false;
        };

        if let Some(stats) = stats {
            let node = self.node_mut(handle);
            let old_size = node.stats.size;
            node.stats = stats;
            self.total_size = self.total_size.saturating_sub(old_size) + stats.size;
        }

        if self.head != Some(handle) {
            self.unlink(handle);
            self.link_front(handle);
        }
        true
    }

    /// Unlink and forget a key, returning its last stats snapshot
    pub fn remove(&mut self, key: &[u8]) -> Option<ValueStats> {
        let handle = self.index.remove(key)?;
        self.unlink(handle);
        let node = self.slots[handle].take()?;
        self.free.push(handle);
        self.total_size = self.total_size.saturating_sub(node.stats.size);
        Some(node.stats)
    }

    /// Keys from the tail whose sizes first add up to at least `target`.
    ///
    /// Always takes at least one key when the list is non-empty. Returns the
    /// keys in LRU-first order together with their combined size.
    pub fn tail_keys(&self, target: u64) -> (Vec<Bytes>, u64) {
        let mut keys = Vec::new();
        let mut accumulated = 0;
        let mut cursor = self.tail;

        while let Some(handle) = cursor {
            let node = self.node(handle);
            keys.push(node.key.clone());
            accumulated += node.stats.size;
            if accumulated >= target {
                break;
            }
            cursor = node.prev;
        }

        (keys, accumulated)
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(handle) = cursor {
            let node = self.node(handle);
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    fn link_front(&mut self, handle: Handle) {
        let old_head = self.head;
        {
            let node = self.node_mut(handle);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(old) => self.node_mut(old).prev = Some(handle),
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
    }

    fn unlink(&mut self, handle: Handle) {
        let (prev, next) = {
            let node = self.node(handle);
            (node.prev, node.next)
        };
        match prev {
            Some(prev_handle) => self.node_mut(prev_handle).next = next,
            None => self.head = next,
        }
        match next {
            Some(next_handle) => self.node_mut(next_handle).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(handle);
        node.prev = None;
        node.next = None;
    }

    fn node(&self, handle: Handle) -> &Node {
        match self.slots.get(handle) {
            Some(Some(node)) => node,
            _ => unreachable!("lru handle {handle} does not refer to a live node"),
        }
    }

    fn node_mut(&mut self, handle: Handle) -> &mut Node {
        match self.slots.get_mut(handle) {
            Some(Some(node)) => node,
            _ => unreachable!("lru handle {handle} does not refer to a live node"),
        }
    }
}

/// Recency order as seen by the consumer thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LruSnapshot {
    /// Most recently used first
    pub keys: Vec<Bytes>,
    pub total_bytes: u64,
}

/// Everything the consumer thread owns
struct LruState {
    list: LruList,
    /// Destroyed by an eviction whose `DestroyBatch` is still queued
    evicting: HashSet<Bytes>,
    max_bytes: u64,
    recovery_pct: u64,
    evictor: Weak<dyn Evictor>,
}

impl LruState {
    fn new(max_bytes: u64, recovery_pct: u64, evictor: Weak<dyn Evictor>) -> Self {
        Self {
            list: LruList::new(),
            evicting: HashSet::new(),
            max_bytes,
            recovery_pct,
            evictor,
        }
    }

    fn handle(&mut self, event: CacheEvent) -> Result<(), CacheError> {
        match event {
            CacheEvent::Put(entry) => {
                if !self.list.insert(entry.key.clone(), entry.stats) {
                    warn!(
                        key = %String::from_utf8_lossy(&entry.key),
                        "LRU put for a key that is already tracked"
                    );
                    return Ok(());
                }
                self.evict_if_oversize()
            }
            CacheEvent::Hit(entry) => {
                if !self.list.touch(&entry.key, None) {
                    debug!(
                        key = %String::from_utf8_lossy(&entry.key),
                        "LRU hit for an untracked key"
                    );
                }
                Ok(())
            }
            CacheEvent::Update { new, .. } => {
                if !self.list.touch(&new.key, Some(new.stats)) {
                    self.untracked(&new.key, "update");
                    return Ok(());
                }
                self.evict_if_oversize()
            }
            CacheEvent::Delete(entry) => {
                if self.list.remove(&entry.key).is_none() {
                    self.untracked(&entry.key, "delete");
                }
                Ok(())
            }
            CacheEvent::DestroyBatch { entries, .. } => {
                // a key evicted here is already unlinked; if it is tracked
                // again, that Put was committed before the destroy
                for entry in &entries {
                    self.evicting.remove(&entry.key);
                    self.list.remove(&entry.key);
                }
                info!(
                    destroyed = entries.len(),
                    tracked_bytes = self.list.total_size(),
                    "LRU dropped destroyed entries"
                );
                Ok(())
            }
            CacheEvent::Miss(_) => Ok(()),
        }
    }

    /// Events for an evicted key can still be queued ahead of its
    /// `DestroyBatch`; those are expected.
    fn untracked(&self, key: &[u8], event: &'static str) {
        let evicting = self.evicting.contains(key);
        let key = String::from_utf8_lossy(key);
        if evicting {
            debug!(%key, event, "LRU event for a key that is being evicted");
        } else {
            warn!(%key, event, "LRU event for an untracked key");
        }
    }

    fn evict_if_oversize(&mut self) -> Result<(), CacheError> {
        let total = self.list.total_size();
        if self.max_bytes == 0 || total <= self.max_bytes {
            return Ok(());
        }

        let evictor = self.evictor.upgrade().ok_or(CacheError::EvictorGone)?;
        let target = (u128::from(self.max_bytes) * u128::from(self.recovery_pct) / 100) as u64;
        let (keys, selected) = self.list.tail_keys(target);
        // unlink before destroying so events queued ahead of the
        // DestroyBatch never pick the same victims again
        for key in &keys {
            self.list.remove(key);
        }
        info!(
            total_bytes = total,
            max_bytes = self.max_bytes,
            target,
            selected_bytes = selected,
            keys = keys.len(),
            "Cache over budget, evicting least recently used entries"
        );

        let destroyed = evictor.evict(&keys);
        self.evicting
            .extend(destroyed.entries.iter().map(|entry| entry.key.clone()));
        debug!(
            evicted = destroyed.len(),
            freed_bytes = destroyed.total_bytes,
            "Eviction batch complete"
        );
        Ok(())
    }

    fn snapshot(&self) -> LruSnapshot {
        LruSnapshot {
            keys: self.list.keys(),
            total_bytes: self.list.total_size(),
        }
    }
}

enum LruMessage {
    Event(CacheEvent),
    Flush(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<LruSnapshot>),
}

/// Event-driven LRU bookkeeping with its own consumer thread
pub struct LruManager {
    tx: mpsc::UnboundedSender<LruMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LruMessage>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    max_bytes: u64,
    recovery_pct: u64,
}

impl LruManager {
    /// `recovery_pct` is clamped to 1..=100
    pub fn new(max_bytes: u64, recovery_pct: u8) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            max_bytes,
            recovery_pct: u64::from(recovery_pct.clamp(1, 100)),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Spawn the consumer thread. Events published earlier are already
    /// queued and are processed first.
    ///
    /// The evictor is held weakly: the engine owns this manager through its
    /// event bus, so a strong reference would keep both alive forever.
    pub fn start<E: Evictor + 'static>(&self, evictor: &Arc<E>) -> Result<(), CacheError> {
        let rx = self.rx.lock().take().ok_or(CacheError::AlreadyStarted)?;
        let evictor = Arc::downgrade(evictor) as Weak<dyn Evictor>;
        let state = LruState::new(self.max_bytes, self.recovery_pct, evictor);

        let handle = thread::Builder::new()
            .name("lru-manager".to_string())
            .spawn(move || run_consumer(rx, state))
            .map_err(|source| CacheError::Spawn {
                name: "lru-manager",
                source,
            })?;
        *self.consumer.lock() = Some(handle);

        info!(
            max_bytes = self.max_bytes,
            recovery_pct = self.recovery_pct,
            "LRU manager started"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.consumer.lock().is_some()
    }

    /// Block until every event queued before this call has been processed.
    ///
    /// Returns false if the consumer is not running. Must not be called from
    /// inside an async runtime.
    pub fn flush(&self) -> bool {
        if !self.is_started() {
            return false;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LruMessage::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.blocking_recv().is_ok()
    }

    /// Recency order after every event queued before this call. Same
    /// blocking rules as [`flush`](Self::flush).
    pub fn snapshot(&self) -> Option<LruSnapshot> {
        if !self.is_started() {
            return None;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(LruMessage::Snapshot(reply_tx)).ok()?;
        reply_rx.blocking_recv().ok()
    }
}

impl CacheEventListener for LruManager {
    fn on_event(&self, event: &CacheEvent) {
        if matches!(event, CacheEvent::Miss(_)) {
            return;
        }
        if self.tx.send(LruMessage::Event(event.clone())).is_err() {
            error!(event = event.name(), "LRU queue is closed, event dropped");
        }
    }
}

fn run_consumer(mut rx: mpsc::UnboundedReceiver<LruMessage>, mut state: LruState) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            LruMessage::Event(event) => {
                let name = event.name();
                // one bad event must not take down the only drain of the queue
                match panic::catch_unwind(AssertUnwindSafe(|| state.handle(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(event = name, error = %e, "LRU manager failed to process event");
                    }
                    Err(_) => {
                        error!(event = name, "LRU manager panicked while processing event");
                    }
                }
            }
            LruMessage::Flush(done) => {
                let _ = done.send(());
            }
            LruMessage::Snapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
        }
    }
    debug!("LRU queue closed, consumer exiting");
}
