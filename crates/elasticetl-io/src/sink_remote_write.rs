//! Remote-write sink: grouped time series POSTed as a JSON
//! `{"timeseries": [...]}` envelope. The Prometheus and VictoriaMetrics
//! flavours differ only in the version header they send.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use elasticetl_core::{
    expand_env, BasicAuth, Error, MetricSpec, RemoteWriteStreamSpec, Sink, TimeSeries,
    TransformedBatch,
};
use elasticetl_tx::series;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub enum RemoteWriteFlavor {
    Prometheus,
    Victoria,
}

impl RemoteWriteFlavor {
    fn kind(self) -> &'static str {
        match self {
            RemoteWriteFlavor::Prometheus => "prometheus_remote_write",
            RemoteWriteFlavor::Victoria => "victoria_remote_write",
        }
    }

    fn version_header(self) -> (&'static str, &'static str) {
        match self {
            RemoteWriteFlavor::Prometheus => ("X-Prometheus-Remote-Write-Version", "0.1.0"),
            RemoteWriteFlavor::Victoria => ("X-VictoriaMetrics-Remote-Write-Version", "1.0"),
        }
    }
}

pub struct RemoteWriteSink {
    flavor: RemoteWriteFlavor,
    endpoint: String,
    client: reqwest::Client,
    basic_auth: Option<BasicAuth>,
    static_labels: BTreeMap<String, String>,
    metrics: Vec<MetricSpec>,
}

impl RemoteWriteSink {
    pub fn new(
        flavor: RemoteWriteFlavor,
        spec: &RemoteWriteStreamSpec,
        metrics: &[MetricSpec],
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(spec.timeout_secs))
            .danger_accept_invalid_certs(spec.insecure_tls)
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;
        Ok(RemoteWriteSink {
            flavor,
            endpoint: spec.endpoint.clone(),
            client,
            basic_auth: spec.basic_auth.clone(),
            static_labels: spec.labels.clone(),
            metrics: metrics.to_vec(),
        })
    }

    fn series_of(&self, batches: &[TransformedBatch]) -> Vec<TimeSeries> {
        let mut all = collect_series(batches, &self.metrics);
        for series in &mut all {
            for (name, value) in &self.static_labels {
                series.labels.push((name.clone(), value.clone()));
            }
        }
        all
    }
}

/// Derives every configured metric's series from every tabular batch,
/// in batch order.
pub fn collect_series(batches: &[TransformedBatch], metrics: &[MetricSpec]) -> Vec<TimeSeries> {
    let mut all = Vec::new();
    for batch in batches {
        if let Some(rows) = &batch.csv_rows {
            for metric in metrics {
                all.extend(series::group(rows, metric));
            }
        }
    }
    all
}

/// The JSON wire envelope shared by both remote-write flavours.
pub fn remote_write_envelope(series: &[TimeSeries]) -> Value {
    let entries: Vec<Value> = series
        .iter()
        .map(|s| {
            json!({
                "labels": s.labels.iter()
                    .map(|(name, value)| json!({"name": name, "value": value}))
                    .collect::<Vec<_>>(),
                "samples": s.samples.iter()
                    .map(|sample| json!({"value": sample.value, "timestamp": sample.timestamp_ms}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "timeseries": entries })
}

#[async_trait]
impl Sink for RemoteWriteSink {
    fn kind(&self) -> &'static str {
        self.flavor.kind()
    }

    async fn load(
        &self,
        batches: &[TransformedBatch],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let series = self.series_of(batches);
        if series.is_empty() {
            debug!(endpoint = %self.endpoint, "no series to push");
            return Ok(());
        }
        let envelope = remote_write_envelope(&series);
        let (header, version) = self.flavor.version_header();
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header, version)
            .json(&envelope);
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
        info!(
            endpoint = %self.endpoint,
            series = series.len(),
            kind = self.flavor.kind(),
            "pushed time series"
        );
        Ok(())
    }
}
