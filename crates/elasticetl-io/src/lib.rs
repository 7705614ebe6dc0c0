//! # ElasticETL I/O
//!
//! The edges of a pipeline: the Elasticsearch endpoint caller on the
//! extract side, and the sink implementations on the load side.
//!
//! ## Extraction
//! - **query**: macro substitution in the search template
//! - **source_elastic**: per-endpoint `POST /_search` with retry,
//!   auth decoration, flattening and filtering
//!
//! ## Sinks
//! - **sink_csv**: timestamped RFC 4180 files
//! - **sink_remote_write**: JSON remote-write envelope (Prometheus and
//!   VictoriaMetrics flavours)
//! - **sink_otel**: OTLP-shaped JSON metrics envelope
//! - **sink_dump**: developer dump files (json/prom/otel)

pub mod query;
pub mod sink_csv;
pub mod sink_dump;
pub mod sink_otel;
pub mod sink_remote_write;
pub mod source_elastic;

use elasticetl_core::{Error, MetricSpec, Sink, StreamSpec};

pub use sink_csv::CsvFileSink;
pub use sink_dump::DumpSink;
pub use sink_otel::OtelSink;
pub use sink_remote_write::{RemoteWriteFlavor, RemoteWriteSink};
pub use source_elastic::ElasticSource;

/// Builds one sink from its stream configuration.
pub fn create_sink(
    stream: &StreamSpec,
    metrics: &[MetricSpec],
) -> Result<Box<dyn Sink>, Error> {
    match stream {
        StreamSpec::CsvFile(spec) => Ok(Box::new(CsvFileSink::new(spec))),
        StreamSpec::PrometheusRemoteWrite(spec) => Ok(Box::new(RemoteWriteSink::new(
            RemoteWriteFlavor::Prometheus,
            spec,
            metrics,
        )?)),
        StreamSpec::VictoriaRemoteWrite(spec) => Ok(Box::new(RemoteWriteSink::new(
            RemoteWriteFlavor::Victoria,
            spec,
            metrics,
        )?)),
        StreamSpec::Otel(spec) => Ok(Box::new(OtelSink::new(spec, metrics)?)),
        StreamSpec::Dump(spec) => Ok(Box::new(DumpSink::new(spec, metrics))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elasticetl_core::{CsvStreamSpec, DumpFormat, DumpStreamSpec};

    #[test]
    fn factory_builds_each_kind() {
        let csv = create_sink(
            &StreamSpec::CsvFile(CsvStreamSpec {
                path: "/tmp/out".into(),
            }),
            &[],
        )
        .unwrap();
        assert_eq!(csv.kind(), "csv_file");

        let dump = create_sink(
            &StreamSpec::Dump(DumpStreamSpec {
                path: "/tmp/dump".into(),
                format: DumpFormat::Prom,
            }),
            &[],
        )
        .unwrap();
        assert_eq!(dump.kind(), "dump");
    }
}
