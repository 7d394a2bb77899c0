//! Metric, label set and kind types shared by the store and its snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::datum::Datum;

/// Kind of a metric.
///
/// Decoding never fails on an unknown kind string: it lands in
/// [`MetricKind::Other`] so consumers can reject the affected samples one by
/// one instead of the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    /// Monotonically increasing total.
    Counter,
    /// Instantaneous value.
    Gauge,
    /// A kind this build does not know.
    Other(String),
}

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Other(kind) => kind,
        }
    }
}

impl From<String> for MetricKind {
    fn from(kind: String) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "counter" => MetricKind::Counter,
            "gauge" => MetricKind::Gauge,
            _ => MetricKind::Other(kind),
        }
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "Counter"),
            MetricKind::Gauge => write!(f, "Gauge"),
            MetricKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// One label combination of a metric and the datum behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSet {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "value")]
    pub datum: Arc<Datum>,
}

impl LabelSet {
    pub fn new(labels: BTreeMap<String, String>, datum: Arc<Datum>) -> Self {
        Self { labels, datum }
    }
}

/// A named metric with all of its label sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    #[serde(default)]
    pub label_sets: Vec<LabelSet>,
}

impl Metric {
    /// Stream every label set into `tx`, in order.
    ///
    /// Stops early if the receiving side goes away.
    pub async fn emit_label_sets(self: Arc<Self>, tx: mpsc::Sender<LabelSet>) {
        for label_set in &self.label_sets {
            if tx.send(label_set.clone()).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(MetricKind::from("counter".to_string()), MetricKind::Counter);
        assert_eq!(MetricKind::from("Gauge".to_string()), MetricKind::Gauge);
        assert_eq!(
            MetricKind::from("histogram".to_string()),
            MetricKind::Other("histogram".to_string())
        );
        assert_eq!(MetricKind::Counter.to_string().to_lowercase(), "counter");
    }

    #[test]
    fn test_metric_decoding() {
        let json = r#"[
            {"name": "lines_total", "kind": "counter", "label_sets": [
                {"labels": {"host": "a"}, "value": 3},
                {"labels": {"host": "b"}, "value": 5.5}
            ]},
            {"name": "queue", "kind": "timer"}
        ]"#;

        let metrics: Vec<Metric> = serde_json::from_str(json).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].kind, MetricKind::Counter);
        assert_eq!(metrics[0].label_sets[1].datum.get(), 5.5);
        assert_eq!(metrics[0].label_sets[0].labels["host"], "a");
        assert_eq!(metrics[1].kind, MetricKind::Other("timer".to_string()));
        assert!(metrics[1].label_sets.is_empty());
    }

    #[tokio::test]
    async fn test_emit_label_sets_drains_in_order() {
        let metric = Arc::new(Metric {
            name: "requests".to_string(),
            kind: MetricKind::Gauge,
            label_sets: (0..10)
                .map(|i| {
                    LabelSet::new(
                        BTreeMap::from([("n".to_string(), i.to_string())]),
                        Arc::new(Datum::new(i as f64)),
                    )
                })
                .collect(),
        });

        let (tx, mut rx) = mpsc::channel(2);
        let producer = tokio::spawn(metric.clone().emit_label_sets(tx));

        let mut seen = Vec::new();
        while let Some(label_set) = rx.recv().await {
            seen.push(label_set.datum.get());
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }
}
