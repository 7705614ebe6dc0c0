//! Per-tick data carried between the pipeline stages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flattened response subtree: dotted/indexed path to scalar value, e.g.
/// `hosts.buckets[0].cpu_usage`.
pub type FlatMap = BTreeMap<String, Value>;

/// Where one extraction result came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractMetadata {
    /// Position in the configured `urls` array; batches aggregate into
    /// sink calls in this order.
    pub endpoint_index: usize,
    pub endpoint: String,
    pub cluster: String,
    /// Query after macro substitution, as sent upstream.
    pub processed_query: String,
    pub original_query: String,
    pub response_bytes: usize,
}

/// One successful endpoint call, flattened and filtered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResult {
    /// Wall clock at completion of the call.
    pub timestamp: DateTime<Utc>,
    /// Endpoint URL the data came from.
    pub source: String,
    pub data: FlatMap,
    pub metadata: ExtractMetadata,
}

/// An [`ExtractResult`] after conversions and optional tabulation.
/// Publication transfers ownership; sinks never observe a map shared
/// with a mutable holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedBatch {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub metadata: ExtractMetadata,
    pub transformed_data: FlatMap,
    /// Sorted de-indexed column names; present iff the tabular output
    /// format is configured.
    pub csv_headers: Option<Vec<String>>,
    /// Rows aligned to `csv_headers`, one per Cartesian index
    /// combination.
    pub csv_rows: Option<Vec<Vec<String>>>,
}

impl TransformedBatch {
    pub fn from_extract(result: ExtractResult, transformed_data: FlatMap) -> Self {
        TransformedBatch {
            timestamp: result.timestamp,
            source: result.source,
            metadata: result.metadata,
            transformed_data,
            csv_headers: None,
            csv_rows: None,
        }
    }
}

/// One Prometheus-style sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A labelled series derived from one batch for one sink; never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Ordered label pairs; the first is always `__name__`.
    pub labels: Vec<(String, String)>,
    /// Samples in row-encounter order.
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn name(&self) -> &str {
        self.label("__name__").unwrap_or_default()
    }
}
