//! Helpers shared by the cache unit tests

use crate::cache::event::{CacheEvent, CacheEventListener};
use crate::cache::value::Clock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Listener that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CacheEventListener for RecordingListener {
    fn on_event(&self, event: &CacheEvent) {
        self.events.lock().push(event.clone());
    }
}
