//! OTEL sink: grouped time series serialised as an OTLP-shaped JSON
//! metrics envelope under the `elasticetl/1.0.0` scope, one metric entry
//! per data point.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use elasticetl_core::{
    expand_env, BasicAuth, Error, MetricSpec, OtelStreamSpec, Sink, TimeSeries, TransformedBatch,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sink_remote_write::collect_series;

pub const SCOPE_NAME: &str = "elasticetl";
pub const SCOPE_VERSION: &str = "1.0.0";

pub struct OtelSink {
    endpoint: String,
    client: reqwest::Client,
    basic_auth: Option<BasicAuth>,
    resource_labels: BTreeMap<String, String>,
    metrics: Vec<MetricSpec>,
}

impl OtelSink {
    pub fn new(spec: &OtelStreamSpec, metrics: &[MetricSpec]) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(spec.timeout_secs))
            .danger_accept_invalid_certs(spec.insecure_tls)
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;
        Ok(OtelSink {
            endpoint: spec.endpoint.clone(),
            client,
            basic_auth: spec.basic_auth.clone(),
            resource_labels: spec.labels.clone(),
            metrics: metrics.to_vec(),
        })
    }
}

fn attributes(pairs: impl Iterator<Item = (String, String)>) -> Vec<Value> {
    pairs
        .map(|(key, value)| json!({"key": key, "value": {"stringValue": value}}))
        .collect()
}

/// The `resourceMetrics` envelope: a single scope, one gauge metric per
/// sample.
pub fn otel_envelope(series: &[TimeSeries], resource: &BTreeMap<String, String>) -> Value {
    let mut metrics = Vec::new();
    for s in series {
        let labels: Vec<(String, String)> = s
            .labels
            .iter()
            .filter(|(name, _)| name != "__name__")
            .cloned()
            .collect();
        for sample in &s.samples {
            metrics.push(json!({
                "name": s.name(),
                "gauge": {
                    "dataPoints": [{
                        "timeUnixNano": (sample.timestamp_ms * 1_000_000).to_string(),
                        "asDouble": sample.value,
                        "attributes": attributes(labels.iter().cloned()),
                    }]
                }
            }));
        }
    }
    json!({
        "resourceMetrics": [{
            "resource": {
                "attributes": attributes(
                    resource.iter().map(|(k, v)| (k.clone(), v.clone()))
                ),
            },
            "scopeMetrics": [{
                "scope": {"name": SCOPE_NAME, "version": SCOPE_VERSION},
                "metrics": metrics,
            }],
        }]
    })
}

#[async_trait]
impl Sink for OtelSink {
    fn kind(&self) -> &'static str {
        "otel"
    }

    async fn load(
        &self,
        batches: &[TransformedBatch],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let series = collect_series(batches, &self.metrics);
        if series.is_empty() {
            debug!(endpoint = %self.endpoint, "no series to export");
            return Ok(());
        }
        let envelope = otel_envelope(&series, &self.resource_labels);
        let mut request = self.client.post(&self.endpoint).json(&envelope);
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(
                expand_env(&auth.username),
                Some(expand_env(&auth.password)),
            );
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = request.send() => outcome.map_err(|e| Error::Transport {
                url: self.endpoint.clone(),
                message: e.to_string(),
            })?,
        };
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                body_prefix: text.chars().take(256).collect(),
            });
        }
        info!(endpoint = %self.endpoint, series = series.len(), "exported otel metrics");
        Ok(())
    }
}
