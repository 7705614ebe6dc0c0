//! Developer dump sink: one file per tick in JSON, Prometheus
//! exposition, or OTEL JSON form.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use elasticetl_core::{
    DumpFormat, DumpStreamSpec, Error, MetricSpec, Sink, TimeSeries, TransformedBatch,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sink_otel::otel_envelope;
use crate::sink_remote_write::collect_series;

pub struct DumpSink {
    base: PathBuf,
    format: DumpFormat,
    metrics: Vec<MetricSpec>,
}

impl DumpSink {
    pub fn new(spec: &DumpStreamSpec, metrics: &[MetricSpec]) -> Self {
        DumpSink {
            base: PathBuf::from(&spec.path),
            format: spec.format,
            metrics: metrics.to_vec(),
        }
    }

    fn timestamped_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let ext = match self.format {
            DumpFormat::Json | DumpFormat::Otel => "json",
            DumpFormat::Prom => "txt",
        };
        PathBuf::from(format!("{}_load_{stamp}.{ext}", self.base.display()))
    }
}

/// Prometheus exposition text: `name{k="v",...} value timestamp`, one
/// line per sample.
pub fn exposition(series: &[TimeSeries]) -> String {
    let mut out = String::new();
    for s in series {
        let labels: Vec<String> = s
            .labels
            .iter()
            .filter(|(name, _)| name != "__name__")
            .map(|(name, value)| format!("{name}=\"{}\"", escape_label(value)))
            .collect();
        let label_block = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        };
        for sample in &s.samples {
            out.push_str(&format!(
                "{}{} {} {}\n",
                s.name(),
                label_block,
                sample.value,
                sample.timestamp_ms
            ));
        }
    }
    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[async_trait]
impl Sink for DumpSink {
    fn kind(&self) -> &'static str {
        "dump"
    }

    async fn load(
        &self,
        batches: &[TransformedBatch],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let content = match self.format {
            DumpFormat::Json => serde_json::to_vec_pretty(batches)?,
            DumpFormat::Prom => {
                exposition(&collect_series(batches, &self.metrics)).into_bytes()
            }
            DumpFormat::Otel => {
                let series = collect_series(batches, &self.metrics);
                serde_json::to_vec_pretty(&otel_envelope(&series, &BTreeMap::new()))?
            }
        };
        let path = self.timestamped_path();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, content)?;
        info!(path = %path.display(), batches = batches.len(), "wrote dump file");
        Ok(())
    }
}
