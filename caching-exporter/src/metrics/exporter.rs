//! Prometheus text exposition of the fixed series and the engine's series.

use std::collections::HashSet;
use std::sync::Arc;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use tracing::warn;

use super::bridge::MetricsBridge;
use super::registry::CachingMetrics;
use crate::error::{Error, Result};

/// Renders one scrape.
#[derive(Clone)]
pub struct PrometheusExporter {
    metrics: CachingMetrics,
    bridge: Arc<MetricsBridge>,
}

impl PrometheusExporter {
    pub fn new(metrics: CachingMetrics, bridge: Arc<MetricsBridge>) -> Self {
        Self { metrics, bridge }
    }

    pub fn metrics(&self) -> &CachingMetrics {
        &self.metrics
    }

    /// Content type of [`PrometheusExporter::export`] output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Every family of this scrape, sorted by name.
    ///
    /// The bridge runs first so the meta counter it advances is already
    /// up to date in the fixed series. An engine family that shares a name
    /// with a fixed series is dropped.
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let dynamic = self.bridge.collect().await;
        let mut families = self.metrics.gather();

        let fixed: HashSet<String> = families.iter().map(|f| f.get_name().to_string()).collect();
        for family in dynamic {
            if fixed.contains(family.get_name()) {
                warn!(
                    metric = family.get_name(),
                    "Engine metric collides with a built-in series; dropping it"
                );
                continue;
            }
            families.push(family);
        }

        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        families
    }

    /// Render the scrape in the text exposition format.
    pub async fn export(&self) -> Result<String> {
        let families = self.gather().await;
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::conversion(e.to_string()))
    }
}
