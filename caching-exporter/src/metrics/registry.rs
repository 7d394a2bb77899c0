//! Fixed Caching Server series.

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, GaugeVec, Opts, Registry};
use tracing::debug;

use crate::error::Result;
use crate::sources::{ConfigState, LiveState};

/// Label of the per-category `caching_data` gauge.
pub const CATEGORY_LABEL: &str = "type";

/// Name of the meta counter advanced by every scrape of the dynamic series.
pub const COLLECTED_METRICS: &str = "caching_collected_metrics";

/// The exporter's own series, registered in a private [`Registry`].
#[derive(Clone)]
pub struct CachingMetrics {
    registry: Registry,

    // Config.plist
    saved_cache_size: Gauge,
    reserved_volume_space: Gauge,
    cached_data: GaugeVec,

    // LastState.plist
    status_active: Gauge,
    peers_total: Gauge,
    bytes_from_origin: TotalCounter,
    bytes_from_peers: TotalCounter,
    bytes_requested: TotalCounter,
    bytes_returned: TotalCounter,

    collected: Counter,
}

impl CachingMetrics {
    /// Create and register every series.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let saved_cache_size =
            Gauge::new("caching_saved_cache_size", "SavedCacheSize from Config.plist")?;
        let reserved_volume_space = Gauge::new(
            "caching_reserved_volume_space",
            "ReservedVolumeSpace from Config.plist",
        )?;
        let cached_data = GaugeVec::new(
            Opts::new("caching_data", "data cached by server."),
            &[CATEGORY_LABEL],
        )?;

        let status_active = Gauge::new(
            "caching_status_active",
            "whether caching server is currently running",
        )?;
        let peers_total = Gauge::new("caching_peers_total", "Number of Caching Server peers")?;
        let bytes_from_origin = Counter::new(
            "caching_bytes_from_origin_total",
            "Number of bytes returned from origin",
        )?;
        let bytes_from_peers = Counter::new(
            "caching_bytes_from_peers_total",
            "Number of bytes returned from peers",
        )?;
        let bytes_requested =
            Counter::new("caching_bytes_requested_total", "Number of bytes requested")?;
        let bytes_returned =
            Counter::new("caching_bytes_returned_total", "Number of bytes returned")?;

        let collected = Counter::new(COLLECTED_METRICS, "total collected metrics")?;

        registry.register(Box::new(saved_cache_size.clone()))?;
        registry.register(Box::new(reserved_volume_space.clone()))?;
        registry.register(Box::new(cached_data.clone()))?;
        registry.register(Box::new(status_active.clone()))?;
        registry.register(Box::new(peers_total.clone()))?;
        registry.register(Box::new(bytes_from_origin.clone()))?;
        registry.register(Box::new(bytes_from_peers.clone()))?;
        registry.register(Box::new(bytes_requested.clone()))?;
        registry.register(Box::new(bytes_returned.clone()))?;
        registry.register(Box::new(collected.clone()))?;

        Ok(Self {
            registry,
            saved_cache_size,
            reserved_volume_space,
            cached_data,
            status_active,
            peers_total,
            bytes_from_origin: TotalCounter::new(bytes_from_origin),
            bytes_from_peers: TotalCounter::new(bytes_from_peers),
            bytes_requested: TotalCounter::new(bytes_requested),
            bytes_returned: TotalCounter::new(bytes_returned),
            collected,
        })
    }

    /// The meta counter the snapshot bridge advances.
    pub fn collected(&self) -> &Counter {
        &self.collected
    }

    /// Gather every registered family.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Publish a configuration store read.
    pub fn apply_config(&self, state: &ConfigState) {
        self.saved_cache_size.set(state.saved_cache_size as f64);
        self.reserved_volume_space
            .set(state.reserved_volume_space as f64);
        for (category, value) in state.saved_cache_details.categories() {
            self.cached_data
                .with_label_values(&[category])
                .set(value as f64);
        }
    }

    /// Publish a live-status read.
    ///
    /// Inactive states zero the gauges and leave the byte counters alone.
    pub fn apply_live(&self, state: &LiveState) {
        if state.active {
            self.status_active.set(1.0);
            self.peers_total.set(state.peers.len() as f64);
            self.bytes_from_origin.observe(state.total_bytes_from_origin);
            self.bytes_from_peers.observe(state.total_bytes_from_peers);
            self.bytes_requested.observe(state.total_bytes_requested);
            self.bytes_returned.observe(state.total_bytes_returned);
        } else {
            self.status_active.set(0.0);
            self.peers_total.set(0.0);
        }
    }
}

/// A counter fed from a running total kept by the Caching Server.
///
/// The counter advances by the difference between successive totals. A total
/// lower than the previous one means the service restarted its own count, so
/// the whole new total is added.
#[derive(Clone)]
struct TotalCounter {
    counter: Counter,
    last_total: Arc<Mutex<i64>>,
}

impl TotalCounter {
    fn new(counter: Counter) -> Self {
        Self {
            counter,
            last_total: Arc::new(Mutex::new(0)),
        }
    }

    fn observe(&self, total: i64) {
        let total = total.max(0);
        let mut last = self.last_total.lock();
        let delta = if total >= *last {
            total - *last
        } else {
            debug!(previous = *last, total, "Byte total went backwards; treating as a reset");
            total
        };
        *last = total;
        if delta > 0 {
            self.counter.inc_by(delta as f64);
        }
    }

    #[cfg(test)]
    fn get(&self) -> f64 {
        self.counter.get()
    }
}
