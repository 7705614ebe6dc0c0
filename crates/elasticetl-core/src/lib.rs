//! # ElasticETL Core
//!
//! Foundational types for ElasticETL pipelines: the configuration
//! schema, the per-tick batch data model, the error taxonomy, the
//! [`Sink`] contract every loader implements, and `${VAR}` environment
//! interpolation for credential strings.
//!
//! The extraction and sink implementations live in `elasticetl-io`, the
//! transform operators in `elasticetl-tx`, and the scheduler in the
//! `elasticetl` binary; this crate is the shared vocabulary between
//! them.

pub mod batch;
pub mod config;
pub mod env;
pub mod error;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use batch::{ExtractMetadata, ExtractResult, FlatMap, Sample, TimeSeries, TransformedBatch};
pub use config::{
    BasicAuth, ByteUnit, Config, ConversionSpec, CsvStreamSpec, DebugSpec, DumpFormat,
    DumpStreamSpec, ExtractSpec, FilterKind, FilterSpec, LabelSpec, LoadSpec, MetricSpec,
    MetricsConfig, OtelStreamSpec, OutputFormat, PipelineSpec, RemoteWriteStreamSpec, StreamSpec,
    TransformSpec, TypeName,
};
pub use env::expand_env;
pub use error::Error;

/// Contract implemented by every loader. `load` is invoked once per tick
/// with all of the tick's batches, concurrently with the pipeline's
/// other sinks; no sink can observe another sink's state.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable sink kind for logs and error aggregation.
    fn kind(&self) -> &'static str;

    /// Delivers one tick's batches. A cancelled token aborts after the
    /// current exchange; no partial batch is delivered from a cancelled
    /// tick.
    async fn load(
        &self,
        batches: &[TransformedBatch],
        cancel: &CancellationToken,
    ) -> Result<(), Error>;

    /// Releases held resources. Default is a no-op.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
