//! Snapshot bridge between the log-processing engine and Prometheus.
//!
//! Every scrape asks the engine for a fresh serialized snapshot, decodes it
//! into a scrape-local `Vec<Metric>` and turns each label set of each metric
//! into one sample. Nothing decoded is shared between scrapes, so concurrent
//! scrapes need no lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logmetrics::{Engine, LabelSet, Metric, MetricKind};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Opts};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::health::{ENGINE_SNAPSHOT, HealthRegistry};
use crate::error::{Error, Result};

/// Buffer size of the in-memory pipe carrying one snapshot.
const SNAPSHOT_PIPE_CAPACITY: usize = 64 * 1024;

/// Label sets in flight between a metric's producer task and the scrape.
const LABEL_SET_CHANNEL_CAPACITY: usize = 64;

/// Default upper bound on fetching one snapshot.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can write a JSON snapshot of its metrics into a byte
/// stream. The writer must be dropped or shut down when done.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn write_snapshot(&self, writer: DuplexStream) -> Result<()>;
}

#[async_trait]
impl SnapshotSource for Engine {
    async fn write_snapshot(&self, writer: DuplexStream) -> Result<()> {
        self.write_metrics(writer).await?;
        Ok(())
    }
}

/// Converts engine snapshots into Prometheus metric families.
pub struct MetricsBridge {
    source: Arc<dyn SnapshotSource>,
    collected: Counter,
    scrape_timeout: Duration,
    health: Option<Arc<HealthRegistry>>,
}

impl MetricsBridge {
    /// `collected` is advanced by the number of samples each scrape emits.
    pub fn new(source: Arc<dyn SnapshotSource>, collected: Counter) -> Self {
        Self {
            source,
            collected,
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
            health: None,
        }
    }

    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = timeout;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = Some(health);
        self
    }

    /// Descriptors this bridge always produces.
    ///
    /// The engine's metrics are only known at scrape time, so this is just
    /// the meta counter.
    pub fn describe(&self) -> Vec<&Desc> {
        self.collected.desc()
    }

    /// Fetch a snapshot and convert every label set into a sample.
    ///
    /// A failed fetch yields no families. A failed conversion drops only
    /// that sample.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => {
                if let Some(health) = &self.health {
                    health.record_healthy(ENGINE_SNAPSHOT);
                }
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch metric snapshot; skipping engine series for this scrape");
                if let Some(health) = &self.health {
                    health.record_degraded(ENGINE_SNAPSHOT, e.to_string());
                }
                return Vec::new();
            }
        };

        let mut families = Vec::with_capacity(snapshot.len());
        let mut emitted = 0usize;

        for metric in snapshot {
            let metric = Arc::new(metric);
            let (tx, mut rx) = mpsc::channel(LABEL_SET_CHANNEL_CAPACITY);
            let producer = tokio::spawn(Arc::clone(&metric).emit_label_sets(tx));

            let mut family: Option<MetricFamily> = None;
            while let Some(label_set) = rx.recv().await {
                match to_family(&metric, &label_set) {
                    Ok(sample) => {
                        emitted += 1;
                        merge_family(&mut family, sample);
                    }
                    Err(e) => {
                        warn!(metric = %metric.name, labels = ?label_set.labels, error = %e, "Skipping sample");
                    }
                }
            }

            if let Err(e) = producer.await {
                warn!(metric = %metric.name, error = %e, "Label set producer failed");
            }
            families.extend(family);
        }

        self.collected.inc_by(emitted as f64);
        debug!(
            families = families.len(),
            samples = emitted,
            "Collected engine metrics"
        );
        families
    }

    async fn fetch_snapshot(&self) -> Result<Vec<Metric>> {
        let (writer, mut reader) = tokio::io::duplex(SNAPSHOT_PIPE_CAPACITY);
        let source = Arc::clone(&self.source);
        let producer = tokio::spawn(async move { source.write_snapshot(writer).await });

        let mut buf = Vec::new();
        match tokio::time::timeout(self.scrape_timeout, reader.read_to_end(&mut buf)).await {
            Ok(read) => {
                read?;
            }
            Err(_) => {
                producer.abort();
                return Err(Error::Snapshot(format!(
                    "timed out after {}s",
                    self.scrape_timeout.as_secs_f64()
                )));
            }
        }

        producer
            .await
            .map_err(|e| Error::Snapshot(format!("writer task failed: {}", e)))??;

        Ok(serde_json::from_slice(&buf)?)
    }
}

/// Build a one-sample family for a label set.
fn to_family(metric: &Metric, label_set: &LabelSet) -> Result<MetricFamily> {
    let help = metric.kind.as_str().to_lowercase();
    let labels: HashMap<String, String> = label_set
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let opts = Opts::new(metric.name.clone(), help).const_labels(labels);
    let value = label_set.datum.get();

    let families = match &metric.kind {
        MetricKind::Counter => {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::conversion(format!(
                    "counter value {} is not a finite non-negative number",
                    value
                )));
            }
            let counter = Counter::with_opts(opts)?;
            counter.inc_by(value);
            counter.collect()
        }
        MetricKind::Gauge => {
            if value.is_nan() {
                return Err(Error::conversion("gauge value is not a number"));
            }
            let gauge = Gauge::with_opts(opts)?;
            gauge.set(value);
            gauge.collect()
        }
        MetricKind::Other(kind) => {
            return Err(Error::conversion(format!("unsupported metric kind {:?}", kind)));
        }
    };

    families
        .into_iter()
        .next()
        .ok_or_else(|| Error::conversion("collector produced no family"))
}

fn merge_family(target: &mut Option<MetricFamily>, mut family: MetricFamily) {
    match target {
        Some(existing) => {
            for sample in family.take_metric().into_iter() {
                existing.mut_metric().push(sample);
            }
        }
        None => *target = Some(family),
    }
}
