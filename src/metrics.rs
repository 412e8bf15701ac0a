//! Prometheus metrics for LodeCache

use crate::cache::CacheStats;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Global metrics instance
pub struct Metrics {
    pub registry: Registry,

    // Command counters
    pub cmd_get: IntCounter,
    pub cmd_gets: IntCounter,
    pub cmd_set: IntCounter,
    pub cmd_cas: IntCounter,
    pub cmd_delete: IntCounter,

    // Connection metrics
    pub active_connections: IntGauge,
    pub total_connections: IntCounter,
    pub rejected_connections: IntCounter,
    pub idle_timeouts: IntCounter,

    // Bytes counters
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,

    // Latency histograms
    pub cmd_latency: Histogram,

    // Error counters
    pub protocol_errors: IntCounter,
    pub server_errors: IntCounter,

    // Cache state, copied from CacheStats at scrape time
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_items: IntGauge,
    cache_size: IntGauge,
    cache_stats: Option<Arc<CacheStats>>,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cmd_get = register(
            &registry,
            IntCounter::new("lodecache_cmd_get_total", "Total GET commands")?,
        )?;
        let cmd_gets = register(
            &registry,
            IntCounter::new("lodecache_cmd_gets_total", "Total GETS commands")?,
        )?;
        let cmd_set = register(
            &registry,
            IntCounter::new("lodecache_cmd_set_total", "Total SET commands")?,
        )?;
        let cmd_cas = register(
            &registry,
            IntCounter::new("lodecache_cmd_cas_total", "Total CAS commands")?,
        )?;
        let cmd_delete = register(
            &registry,
            IntCounter::new("lodecache_cmd_delete_total", "Total DELETE commands")?,
        )?;

        let active_connections = register(
            &registry,
            IntGauge::new("lodecache_active_connections", "Current active connections")?,
        )?;
        let total_connections = register(
            &registry,
            IntCounter::new("lodecache_connections_total", "Total connections accepted")?,
        )?;
        let rejected_connections = register(
            &registry,
            IntCounter::new(
                "lodecache_rejected_connections_total",
                "Total connections rejected",
            )?,
        )?;
        let idle_timeouts = register(
            &registry,
            IntCounter::new(
                "lodecache_idle_timeouts_total",
                "Connections closed for being idle",
            )?,
        )?;

        let bytes_read = register(
            &registry,
            IntCounter::new("lodecache_bytes_read_total", "Total bytes read")?,
        )?;
        let bytes_written = register(
            &registry,
            IntCounter::new("lodecache_bytes_written_total", "Total bytes written")?,
        )?;

        let cmd_latency = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("lodecache_cmd_latency_seconds", "Command latency in seconds")
                    .buckets(vec![
                        0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                    ]),
            )?,
        )?;

        let protocol_errors = register(
            &registry,
            IntCounter::new("lodecache_protocol_errors_total", "Total protocol errors")?,
        )?;
        let server_errors = register(
            &registry,
            IntCounter::new("lodecache_server_errors_total", "Total server errors")?,
        )?;

        let cache_hits = register(
            &registry,
            IntGauge::new("lodecache_cache_hits", "Cache lookups that hit")?,
        )?;
        let cache_misses = register(
            &registry,
            IntGauge::new("lodecache_cache_misses", "Cache lookups that missed")?,
        )?;
        let cache_items = register(
            &registry,
            IntGauge::new("lodecache_cache_items", "Items currently stored")?,
        )?;
        let cache_size = register(
            &registry,
            IntGauge::new("lodecache_cache_size_bytes", "Payload bytes currently stored")?,
        )?;

        Ok(Self {
            registry,
            cmd_get,
            cmd_gets,
            cmd_set,
            cmd_cas,
            cmd_delete,
            active_connections,
            total_connections,
            rejected_connections,
            idle_timeouts,
            bytes_read,
            bytes_written,
            cmd_latency,
            protocol_errors,
            server_errors,
            cache_hits,
            cache_misses,
            cache_items,
            cache_size,
            cache_stats: None,
        })
    }

    /// Export the cache counters alongside the server metrics
    pub fn with_cache_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.cache_stats = Some(stats);
        self
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> prometheus::Result<String> {
        if let Some(stats) = &self.cache_stats {
            let snapshot = stats.snapshot();
            self.cache_hits.set(snapshot.hits as i64);
            self.cache_misses.set(snapshot.misses as i64);
            self.cache_items.set(snapshot.items);
            self.cache_size.set(snapshot.size);
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> prometheus::Result<C> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEngine, EventBus};
    use bytes::Bytes;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.cmd_get.inc();
        metrics.cmd_set.inc();
        metrics.active_connections.set(5);

        let output = metrics.gather().unwrap();
        assert!(output.contains("lodecache_cmd_get_total 1"));
        assert!(output.contains("lodecache_active_connections 5"));
    }

    #[test]
    fn test_cache_gauges_follow_stats() {
        let stats = Arc::new(CacheStats::new());
        let engine = CacheEngine::new(EventBus::new().with_listener(stats.clone()));
        let metrics = Metrics::new().unwrap().with_cache_stats(stats);

        engine.set(Bytes::from_static(b"k"), Bytes::from_static(b"hello"), 0, 0);
        engine.get(b"k");
        engine.get(b"missing");

        let output = metrics.gather().unwrap();
        assert!(output.contains("lodecache_cache_hits 1"));
        assert!(output.contains("lodecache_cache_misses 1"));
        assert!(output.contains("lodecache_cache_items 1"));
        assert!(output.contains("lodecache_cache_size_bytes 5"));
    }
}
