//! Metrics and health.
//!
//! - [`CachingMetrics`]: the fixed series fed by the poller.
//! - [`MetricsBridge`]: the engine's series, converted on every scrape.
//! - [`PrometheusExporter`]: renders both for `/metrics`.
//! - [`HealthRegistry`]: per-source refresh outcomes for `/health`.

mod bridge;
mod exporter;
mod health;
mod registry;

pub use bridge::{DEFAULT_SCRAPE_TIMEOUT, MetricsBridge, SnapshotSource};
pub use exporter::PrometheusExporter;
pub use health::{
    CONFIG_STORE, ComponentHealth, ENGINE_SNAPSHOT, HealthRegistry, HealthStatus, LIVE_STATE,
    SystemHealth,
};
pub use registry::{CATEGORY_LABEL, COLLECTED_METRICS, CachingMetrics};
