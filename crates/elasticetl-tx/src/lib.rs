//! # ElasticETL Transforms
//!
//! The data-shaping operators between extraction and loading:
//!
//! - **flatten**: JSON path selection and recursive flattening with the
//!   `value`-collapse rule
//! - **filter**: ordered include/exclude filtering over flattened keys
//! - **convert**: typed and byte-unit value conversions, plus the
//!   zeros-for-null substitution pass
//! - **table**: depth-analysed column derivation and Cartesian
//!   array-index expansion into dense rows
//! - **series**: grouping CSV rows into Prometheus-style time series
//! - **history**: the bounded ring of previous batch sets
//!
//! [`transform`] wires the per-batch stages together in the order the
//! engine runs them.

pub mod convert;
pub mod filter;
pub mod flatten;
pub mod history;
pub mod series;
pub mod table;

use elasticetl_core::{Error, ExtractResult, OutputFormat, TransformSpec, TransformedBatch};
use tracing::debug;

/// Runs one extraction result through the transform stage: the optional
/// zeros-for-null pass, the configured conversions, and (for the
/// tabular output format) header derivation and row expansion.
pub fn transform(
    mut result: ExtractResult,
    spec: &TransformSpec,
) -> Result<TransformedBatch, Error> {
    let mut data = std::mem::take(&mut result.data);
    if spec.substitute_zeros_for_null {
        convert::substitute_zeros_for_null(&mut data);
    }
    convert::apply(&mut data, &spec.conversion_functions)?;

    let mut batch = TransformedBatch::from_extract(result, data);
    if spec.output_format == OutputFormat::Csv {
        let (headers, rows) = table::tabulate(&batch.transformed_data);
        debug!(
            source = %batch.source,
            columns = headers.len(),
            rows = rows.len(),
            "tabulated batch"
        );
        batch.csv_headers = Some(headers);
        batch.csv_rows = Some(rows);
    }
    Ok(batch)
}
