//! Concurrent live metric store.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::metric::{LabelSet, Metric, MetricKind};

/// A declared metric: kind, label keys and one datum per label-value tuple.
#[derive(Debug)]
struct StoredMetric {
    kind: MetricKind,
    keys: Vec<String>,
    sets: DashMap<Vec<String>, Arc<Datum>>,
}

/// Live metrics keyed by name.
///
/// Writers (the tailers) and readers (snapshots) run concurrently; datums are
/// shared through `Arc` so a snapshot taken while lines are processed reads
/// whatever value each datum holds at serialization time.
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: DashMap<String, StoredMetric>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a metric.
    ///
    /// Redeclaring with the same kind and keys is a no-op; anything else is a
    /// conflict. Metrics without label keys get their single datum up front
    /// so they are exported before the first matching line.
    pub fn declare(&self, name: &str, kind: MetricKind, keys: Vec<String>) -> Result<()> {
        match self.metrics.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.kind != kind || existing.keys != keys {
                    return Err(Error::Conflict {
                        name: name.to_string(),
                    });
                }
            }
            Entry::Vacant(slot) => {
                let sets = DashMap::new();
                if keys.is_empty() {
                    sets.insert(Vec::new(), Arc::new(Datum::default()));
                }
                slot.insert(StoredMetric { kind, keys, sets });
            }
        }
        Ok(())
    }

    /// Datum for a label-value tuple, created on first use.
    ///
    /// Returns `None` for undeclared metrics or a tuple of the wrong arity.
    pub fn datum(&self, name: &str, values: Vec<String>) -> Option<Arc<Datum>> {
        let metric = self.metrics.get(name)?;
        if values.len() != metric.keys.len() {
            return None;
        }
        let datum = metric
            .sets
            .entry(values)
            .or_insert_with(|| Arc::new(Datum::default()))
            .clone();
        Some(datum)
    }

    /// Number of declared metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Copy of every metric, ordered by name, label sets ordered by labels.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .metrics
            .iter()
            .map(|entry| {
                let stored = entry.value();
                let mut label_sets: Vec<LabelSet> = stored
                    .sets
                    .iter()
                    .map(|set| {
                        let labels = stored
                            .keys
                            .iter()
                            .cloned()
                            .zip(set.key().iter().cloned())
                            .collect();
                        LabelSet::new(labels, set.value().clone())
                    })
                    .collect();
                label_sets.sort_by(|a, b| a.labels.cmp(&b.labels));

                Metric {
                    name: entry.key().clone(),
                    kind: stored.kind.clone(),
                    label_sets,
                }
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }
}
