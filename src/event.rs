//! Core event types shared by every stage of the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A set of labels (key-value pairs) attached to a metric event
/// Labels are stored in sorted order so equal sets compare and serialize equally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    /// Create a new LabelSet from a map
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        LabelSet { labels }
    }

    /// Create an empty LabelSet
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create LabelSet from slice of (key, value) tuples
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let labels = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(labels)
    }

    /// Get a specific label value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Composite aggregation key: (producer id, metric name)
///
/// Structural equality, so `("a:b", "c")` and `("a", "b:c")` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub producer_id: String,
    pub metric_name: String,
}

impl AggregationKey {
    pub fn new(producer_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        AggregationKey {
            producer_id: producer_id.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.producer_id, self.metric_name)
    }
}

/// A single validated telemetry sample
///
/// Immutable once built: the decoder creates it, the buffer owns it until a
/// batch is drained, and the batch is discarded after the persistence attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    producer_id: String,
    metric_name: String,
    value: f64,
    #[serde(default)]
    labels: LabelSet,
    /// Event time in milliseconds since the Unix epoch
    timestamp_ms: u64,
}

impl MetricEvent {
    pub fn new(
        producer_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        timestamp_ms: u64,
    ) -> Self {
        MetricEvent {
            producer_id: producer_id.into(),
            metric_name: metric_name.into(),
            value,
            labels: LabelSet::empty(),
            timestamp_ms,
        }
    }

    /// Attach labels at construction time
    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// The aggregation key this event updates
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(self.producer_id.clone(), self.metric_name.clone())
    }
}
