//! Pipeline configuration schema.
//!
//! The whole tree is plain serde data loaded from YAML by the runner.
//! Specs are immutable once installed; reconfiguration replaces a
//! pipeline's spec wholesale rather than mutating it in place.
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! pipelines:
//!   - name: "cluster-cpu"
//!     interval_secs: 60
//!     extract:
//!       query: '{"query":{"range":{"@timestamp":{"gte":__STARTTIME__,"lte":__ENDTIME__}}}}'
//!       urls: ["http://es-a:9200", "http://es-b:9200"]
//!       cluster_names: ["prod-a", "prod-b"]
//!       json_path: "aggregations.services.buckets"
//!       start_time: "NOW-1MIN"
//!       end_time: "NOW"
//!     transform:
//!       output_format: csv
//!       conversion_functions:
//!         - function: convert_to_mb
//!           field: '.*memory.*'
//!           from_unit: bytes
//!     load:
//!       streams:
//!         - type: prometheus_remote_write
//!           endpoint: "http://mimir:9009/api/v1/push"
//!       metrics:
//!         - name: cpu_usage
//!           unique_fields_index: [0]
//!           value: 2
//!           timestamp: 1
//!           labels:
//!             - label_name: host
//!               index_in_csv_data: 0
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Top-level configuration file: global settings plus one entry per
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scalar metrics exposition (Prometheus listener); omit to disable.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,

    /// Pipeline definitions, keyed by their unique `name`.
    pub pipelines: Vec<PipelineSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Listen address for the Prometheus scrape endpoint, e.g. "0.0.0.0:9464".
    pub listen: String,
}

/// One pipeline: extract on a cadence, transform, fan out to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Unique pipeline name; add/remove/replace is idempotent by name.
    pub name: String,

    /// Disabled pipelines are parsed and validated but never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Tick cadence in seconds. Missed ticks are coalesced; a tick that
    /// fires while the previous run is still in flight is skipped.
    pub interval_secs: u64,

    pub extract: ExtractSpec,

    #[serde(default)]
    pub transform: TransformSpec,

    pub load: LoadSpec,
}

/// Extraction stage: the query template and the endpoints it is sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    /// Search body template. `__CLUSTER__`, `__STARTTIME__` and
    /// `__ENDTIME__` are substituted per endpoint at tick time.
    pub query: String,

    /// One Elasticsearch base URL per endpoint; `POST {url}/_search`.
    pub urls: Vec<String>,

    /// Cluster name substituted for `__CLUSTER__`, index-aligned with
    /// `urls`.
    pub cluster_names: Vec<String>,

    /// Optional per-endpoint `Authorization` header values. `${VAR}`
    /// tokens are resolved from the environment at request time.
    #[serde(default)]
    pub auth_headers: Option<Vec<String>>,

    /// Optional per-endpoint extra headers, each a `"Name: value"` string
    /// split on the first colon.
    #[serde(default)]
    pub additional_headers: Option<Vec<Vec<String>>>,

    /// Dotted path selecting the subtree to flatten; numeric segments
    /// index into arrays. Empty selects the whole response body.
    #[serde(default)]
    pub json_path: String,

    /// Ordered include/exclude filters over flattened keys.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts on transport failure or HTTP 5xx, with linear
    /// one-second backoff per attempt.
    #[serde(default)]
    pub max_retries: u32,

    /// Time spec for `__STARTTIME__`: `NOW`, `NOW-5MIN`, `NOW+30SEC`, or
    /// a literal epoch-milliseconds integer.
    #[serde(default)]
    pub start_time: Option<String>,

    /// Time spec for `__ENDTIME__`; same grammar as `start_time`.
    #[serde(default)]
    pub end_time: Option<String>,

    /// Accept invalid upstream TLS certificates.
    #[serde(default)]
    pub insecure_tls: bool,

    /// Raw-response dumps for development.
    #[serde(default)]
    pub debug: Option<DebugSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Directory receiving one raw-response file per endpoint per tick.
    pub path: String,
}

/// A single key filter. With at least one `include` present the working
/// set starts empty and includes add to it; otherwise it starts as a full
/// copy and excludes strike from it. Filters apply in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    /// Regular expression; an invalid pattern degrades to exact string
    /// equality.
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Include,
    Exclude,
}

/// Transform stage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Stateless pipelines never populate the history ring.
    #[serde(default)]
    pub stateless: bool,

    /// Replace every null in the flattened map with integer `0` before
    /// conversions run.
    #[serde(default)]
    pub substitute_zeros_for_null: bool,

    /// Capacity of the per-pipeline history ring; 0 disables it.
    #[serde(default)]
    pub previous_results_sets: usize,

    #[serde(default)]
    pub conversion_functions: Vec<ConversionSpec>,

    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    /// Additionally derive the tabular form: depth-analysed headers plus
    /// Cartesian-expanded rows.
    Csv,
}

/// One value conversion. `field` is matched as a regular expression when
/// it compiles, otherwise as a literal key; a missing literal key is a
/// no-op, an unconvertible value fails the tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum ConversionSpec {
    ConvertType {
        field: String,
        /// Advisory only: documents the expected source type in config.
        /// Coercion is driven by the value's actual runtime type, so a
        /// mismatched `from` is never an error.
        #[serde(default)]
        from: Option<TypeName>,
        to: TypeName,
    },
    ConvertToKb {
        field: String,
        from_unit: ByteUnit,
    },
    ConvertToMb {
        field: String,
        from_unit: ByteUnit,
    },
    ConvertToGb {
        field: String,
        from_unit: ByteUnit,
    },
}

impl ConversionSpec {
    pub fn field(&self) -> &str {
        match self {
            ConversionSpec::ConvertType { field, .. }
            | ConversionSpec::ConvertToKb { field, .. }
            | ConversionSpec::ConvertToMb { field, .. }
            | ConversionSpec::ConvertToGb { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeName {
    String,
    Int,
    Float,
    Bool,
}

/// Byte units on the K = 1024 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteUnit {
    B,
    Bytes,
    Kb,
    Mb,
    Gb,
}

impl ByteUnit {
    /// Multiplier from this unit to bytes.
    pub fn bytes_factor(self) -> f64 {
        match self {
            ByteUnit::B | ByteUnit::Bytes => 1.0,
            ByteUnit::Kb => 1024.0,
            ByteUnit::Mb => 1024.0 * 1024.0,
            ByteUnit::Gb => 1024.0 * 1024.0 * 1024.0,
        }
    }
}

/// Load stage: sink streams plus the metric shapes series-producing
/// sinks derive from the tabular form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSpec {
    pub streams: Vec<StreamSpec>,

    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamSpec {
    /// One timestamped RFC 4180 file per tick.
    CsvFile(CsvStreamSpec),
    /// JSON `{"timeseries": [...]}` envelope POSTed to a remote-write
    /// endpoint.
    PrometheusRemoteWrite(RemoteWriteStreamSpec),
    /// Same envelope, VictoriaMetrics flavour (version header differs).
    VictoriaRemoteWrite(RemoteWriteStreamSpec),
    /// OTLP-shaped JSON metrics envelope.
    Otel(OtelStreamSpec),
    /// Developer dump file per tick.
    Dump(DumpStreamSpec),
}

impl StreamSpec {
    /// Whether this sink consumes grouped time series (and therefore
    /// requires the tabular output format plus `metrics` specs).
    pub fn needs_series(&self) -> bool {
        match self {
            StreamSpec::PrometheusRemoteWrite(_)
            | StreamSpec::VictoriaRemoteWrite(_)
            | StreamSpec::Otel(_) => true,
            StreamSpec::Dump(d) => !matches!(d.format, DumpFormat::Json),
            StreamSpec::CsvFile(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvStreamSpec {
    /// Base path; the sink appends `_YYYYMMDD_HHMMSS.csv`.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWriteStreamSpec {
    pub endpoint: String,

    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default)]
    pub insecure_tls: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Static labels appended to every emitted series.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelStreamSpec {
    pub endpoint: String,

    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default)]
    pub insecure_tls: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resource attributes attached to the envelope.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Credentials with `${VAR}` environment interpolation at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpStreamSpec {
    /// Base path; the sink appends `_load_YYYYMMDD_HHMMSS.{ext}`.
    pub path: String,

    #[serde(default)]
    pub format: DumpFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Full transformed batches, pretty-printed.
    #[default]
    Json,
    /// Prometheus exposition text.
    Prom,
    /// OTLP-shaped JSON.
    Otel,
}

/// How to turn CSV rows into one family of time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Series `__name__`.
    pub name: String,

    /// Column indices whose joined values key a series group.
    #[serde(default)]
    pub unique_fields_index: Vec<usize>,

    /// Column index parsed as the f64 sample value.
    pub value: usize,

    /// Column index parsed as the i64 sample timestamp (milliseconds).
    pub timestamp: usize,

    #[serde(default)]
    pub labels: Vec<LabelSpec>,
}

/// A series label sourced from a CSV column or a static value; exactly
/// one of the two must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSpec {
    pub label_name: String,

    #[serde(default)]
    pub index_in_csv_data: Option<usize>,

    #[serde(default)]
    pub static_value: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = std::collections::HashSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate pipeline name {:?}",
                    pipeline.name
                )));
            }
            pipeline.validate()?;
        }
        Ok(())
    }
}

impl PipelineSpec {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::config("pipeline name must not be empty"));
        }
        if self.interval_secs == 0 {
            return Err(Error::config(format!(
                "pipeline {:?}: interval_secs must be positive",
                self.name
            )));
        }
        self.extract.validate(&self.name)?;
        self.load.validate(&self.name, self.transform.output_format)?;
        Ok(())
    }
}

impl ExtractSpec {
    /// Number of endpoints actually issued: the shortest of the aligned
    /// arrays bounds the fan-out, extras are silently dropped.
    pub fn endpoint_count(&self) -> usize {
        let mut n = self.urls.len().min(self.cluster_names.len());
        if let Some(auth) = &self.auth_headers {
            n = n.min(auth.len());
        }
        if let Some(extra) = &self.additional_headers {
            n = n.min(extra.len());
        }
        n
    }

    fn validate(&self, pipeline: &str) -> Result<(), Error> {
        if self.query.trim().is_empty() {
            return Err(Error::config(format!(
                "pipeline {pipeline:?}: extract.query must not be empty"
            )));
        }
        if self.endpoint_count() == 0 {
            return Err(Error::config(format!(
                "pipeline {pipeline:?}: no usable endpoints \
                 (urls/cluster_names/auth_headers/additional_headers align to zero)"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config(format!(
                "pipeline {pipeline:?}: extract.timeout_secs must be positive"
            )));
        }
        if let Some(debug) = &self.debug {
            if debug.enabled && debug.path.trim().is_empty() {
                return Err(Error::config(format!(
                    "pipeline {pipeline:?}: extract.debug.path must not be empty"
                )));
            }
        }
        Ok(())
    }
}

impl LoadSpec {
    fn validate(&self, pipeline: &str, output: OutputFormat) -> Result<(), Error> {
        if self.streams.is_empty() {
            return Err(Error::config(format!(
                "pipeline {pipeline:?}: load.streams must not be empty"
            )));
        }
        let needs_series = self.streams.iter().any(StreamSpec::needs_series);
        if needs_series {
            if output != OutputFormat::Csv {
                return Err(Error::config(format!(
                    "pipeline {pipeline:?}: series-producing streams require \
                     transform.output_format: csv"
                )));
            }
            if self.metrics.is_empty() {
                return Err(Error::config(format!(
                    "pipeline {pipeline:?}: series-producing streams require \
                     at least one load.metrics entry"
                )));
            }
        }
        for metric in &self.metrics {
            metric.validate(pipeline)?;
        }
        Ok(())
    }
}

impl MetricSpec {
    fn validate(&self, pipeline: &str) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::config(format!(
                "pipeline {pipeline:?}: metric name must not be empty"
            )));
        }
        for label in &self.labels {
            match (&label.index_in_csv_data, &label.static_value) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(Error::config(format!(
                        "pipeline {pipeline:?}: metric {:?} label {:?} needs exactly \
                         one of index_in_csv_data or static_value",
                        self.name, label.label_name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
pipelines:
  - name: demo
    interval_secs: 30
    extract:
      query: '{"size":0}'
      urls: ["http://localhost:9200"]
      cluster_names: ["local"]
    transform:
      output_format: csv
    load:
      streams:
        - type: csv_file
          path: /tmp/out/demo
"#
    }

    #[test]
    fn parses_and_validates_minimal_config() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();
        let pipeline = &config.pipelines[0];
        assert!(pipeline.enabled);
        assert_eq!(pipeline.extract.endpoint_count(), 1);
        assert_eq!(pipeline.extract.timeout_secs, 30);
        assert_eq!(pipeline.transform.output_format, OutputFormat::Csv);
    }

    #[test]
    fn endpoint_count_is_bounded_by_shortest_array() {
        let spec = ExtractSpec {
            query: "{}".into(),
            urls: vec!["a".into(), "b".into(), "c".into()],
            cluster_names: vec!["x".into(), "y".into()],
            auth_headers: Some(vec!["Bearer t".into()]),
            additional_headers: None,
            json_path: String::new(),
            filters: vec![],
            timeout_secs: 30,
            max_retries: 0,
            start_time: None,
            end_time: None,
            insecure_tls: false,
            debug: None,
        };
        assert_eq!(spec.endpoint_count(), 1);
    }

    #[test]
    fn zero_endpoints_is_a_config_error() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.pipelines[0].extract.cluster_names.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn series_streams_require_csv_output_and_metrics() {
        let yaml = r#"
pipelines:
  - name: demo
    interval_secs: 30
    extract:
      query: '{"size":0}'
      urls: ["http://localhost:9200"]
      cluster_names: ["local"]
    load:
      streams:
        - type: prometheus_remote_write
          endpoint: http://mimir:9009/api/v1/push
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn conversion_specs_parse_by_function_tag() {
        let yaml = r#"
- function: convert_type
  field: doc_count
  to: float
- function: convert_to_kb
  field: '.*bytes$'
  from_unit: mb
"#;
        let specs: Vec<ConversionSpec> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            specs[0],
            ConversionSpec::ConvertType {
                to: TypeName::Float,
                ..
            }
        ));
        assert!(matches!(
            specs[1],
            ConversionSpec::ConvertToKb {
                from_unit: ByteUnit::Mb,
                ..
            }
        ));
    }

    #[test]
    fn label_spec_requires_exactly_one_source() {
        let yaml = r#"
pipelines:
  - name: demo
    interval_secs: 30
    extract:
      query: '{"size":0}'
      urls: ["http://localhost:9200"]
      cluster_names: ["local"]
    transform:
      output_format: csv
    load:
      streams:
        - type: victoria_remote_write
          endpoint: http://vm:8428/api/v1/write
      metrics:
        - name: m
          value: 2
          timestamp: 1
          labels:
            - label_name: broken
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
