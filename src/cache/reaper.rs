//! Background removal of expired entries
//!
//! Reads never remove anything, so expired values stay in the map until a
//! sweep finds them. Each sweep scans under the read lock and destroys the
//! batch under the write lock, which keeps the LRU and stats subscribers in
//! step through the resulting `DestroyBatch` event.

use crate::cache::engine::CacheEngine;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle to the sweep task. Cancels the task when dropped.
pub struct Reaper {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the sweep task on the current tokio runtime
    pub fn spawn(engine: Arc<CacheEngine>, period: Duration) -> Result<Self, CacheError> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime {
            name: "cache-reaper",
        })?;
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run(engine, period, cancel.clone()));

        info!(period_ms = period.as_millis() as u64, "Reaper started");
        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    /// Cancel the task and wait for an in-progress sweep to finish
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            error!(error = %e, "Reaper task failed");
        }
        info!("Reaper stopped");
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(engine: Arc<CacheEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // a sweep holds the engine's write lock, keep it off the async workers
        let sweep = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || sweep.reap_expired()).await {
            Ok(0) => debug!("Reaper sweep found nothing to remove"),
            Ok(removed) => info!(removed, remaining = engine.len(), "Reaped expired entries"),
            Err(e) => error!(error = %e, "Reaper sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::event::EventBus;
    use crate::cache::test_utils::ManualClock;
    use bytes::Bytes;
    use tokio::time::{Instant, sleep, timeout};

    async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_reaper_removes_expired_entries() {
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = Arc::new(CacheEngine::with_clock(EventBus::new(), clock.clone()));
        engine.set(Bytes::from_static(b"short"), Bytes::from_static(b"v"), 1, 0);
        engine.set(Bytes::from_static(b"forever"), Bytes::from_static(b"v"), 0, 0);

        let mut reaper = Reaper::spawn(Arc::clone(&engine), Duration::from_millis(10)).unwrap();
        clock.advance(5);

        assert!(wait_until(Duration::from_secs(5), || engine.len() == 1).await);
        assert!(engine.get(b"forever").is_some());
        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_period() {
        let engine = Arc::new(CacheEngine::new(EventBus::new()));
        let mut reaper = Reaper::spawn(engine, Duration::from_secs(3600)).unwrap();

        timeout(Duration::from_secs(5), reaper.stop())
            .await
            .expect("reaper did not stop");

        // second stop is a no-op
        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let engine = Arc::new(CacheEngine::new(EventBus::new()));
        let reaper = Reaper::spawn(engine, Duration::from_secs(3600)).unwrap();
        let cancel = reaper.cancel.clone();

        drop(reaper);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let engine = Arc::new(CacheEngine::new(EventBus::new()));
        assert!(matches!(
            Reaper::spawn(engine, Duration::from_secs(1)),
            Err(CacheError::NoRuntime { .. })
        ));
    }
}
