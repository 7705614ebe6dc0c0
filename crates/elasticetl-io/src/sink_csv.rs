//! CSV file sink: one timestamped RFC 4180 file per tick.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use elasticetl_core::{CsvStreamSpec, Error, Sink, TransformedBatch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct CsvFileSink {
    base: PathBuf,
}

impl CsvFileSink {
    pub fn new(spec: &CsvStreamSpec) -> Self {
        CsvFileSink {
            base: PathBuf::from(&spec.path),
        }
    }

    fn timestamped_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("{}_{stamp}.csv", self.base.display()))
    }
}

fn csv_error(e: csv::Error) -> Error {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::transform(format!("csv: {other:?}")),
    }
}

#[async_trait]
impl Sink for CsvFileSink {
    fn kind(&self) -> &'static str {
        "csv_file"
    }

    async fn load(
        &self,
        batches: &[TransformedBatch],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let tabular: Vec<&TransformedBatch> = batches
            .iter()
            .filter(|b| b.csv_headers.is_some() && b.csv_rows.is_some())
            .collect();
        let Some(first) = tabular.first() else {
            warn!(base = %self.base.display(), "no tabular batches, skipping csv file");
            return Ok(());
        };

        let path = self.timestamped_path();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        if let Some(headers) = &first.csv_headers {
            writer.write_record(headers).map_err(csv_error)?;
        }
        let mut written = 0usize;
        for batch in &tabular {
            if let Some(rows) = &batch.csv_rows {
                for row in rows {
                    writer.write_record(row).map_err(csv_error)?;
                    written += 1;
                }
            }
        }
        writer.flush()?;
        info!(path = %path.display(), rows = written, "wrote csv file");
        Ok(())
    }
}
