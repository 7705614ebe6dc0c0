//! Macro substitution in the search query template.
//!
//! Substitution is textual, case-sensitive and exact-token:
//! `__CLUSTER__` becomes the endpoint's cluster name, `__STARTTIME__`
//! and `__ENDTIME__` become epoch milliseconds resolved from the
//! configured time specs.

use chrono::Utc;
use elasticetl_core::Error;

pub const CLUSTER_MACRO: &str = "__CLUSTER__";
pub const START_TIME_MACRO: &str = "__STARTTIME__";
pub const END_TIME_MACRO: &str = "__ENDTIME__";

/// Expands every macro the template uses, resolving `NOW` against the
/// current wall clock.
pub fn expand(
    template: &str,
    cluster: &str,
    start_spec: Option<&str>,
    end_spec: Option<&str>,
) -> Result<String, Error> {
    expand_at(
        template,
        cluster,
        start_spec,
        end_spec,
        Utc::now().timestamp_millis(),
    )
}

/// [`expand`] with an explicit reference clock.
pub fn expand_at(
    template: &str,
    cluster: &str,
    start_spec: Option<&str>,
    end_spec: Option<&str>,
    now_ms: i64,
) -> Result<String, Error> {
    let mut query = template.replace(CLUSTER_MACRO, cluster);
    query = substitute_time(query, START_TIME_MACRO, start_spec, now_ms)?;
    query = substitute_time(query, END_TIME_MACRO, end_spec, now_ms)?;
    Ok(query)
}

fn substitute_time(
    query: String,
    macro_token: &str,
    spec: Option<&str>,
    now_ms: i64,
) -> Result<String, Error> {
    if !query.contains(macro_token) {
        return Ok(query);
    }
    let spec = spec
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::config(format!("query uses {macro_token} but no time spec is configured"))
        })?;
    let ms = parse_time_spec(spec, now_ms)?;
    Ok(query.replace(macro_token, &ms.to_string()))
}

/// Time spec grammar, case-insensitive: `NOW`, `NOW±<digits>MIN`,
/// `NOW±<digits>SEC`, or a bare signed decimal integer taken as literal
/// epoch milliseconds.
pub fn parse_time_spec(spec: &str, now_ms: i64) -> Result<i64, Error> {
    let trimmed = spec.trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper == "NOW" {
        return Ok(now_ms);
    }
    if let Some(offset) = upper.strip_prefix("NOW") {
        let (sign, magnitude) = if let Some(m) = offset.strip_prefix('+') {
            (1i64, m)
        } else if let Some(m) = offset.strip_prefix('-') {
            (-1i64, m)
        } else {
            return Err(Error::config(format!("invalid time spec {spec:?}")));
        };
        let (digits, unit_ms) = if let Some(d) = magnitude.strip_suffix("MIN") {
            (d, 60_000i64)
        } else if let Some(d) = magnitude.strip_suffix("SEC") {
            (d, 1_000i64)
        } else {
            return Err(Error::config(format!(
                "invalid time spec {spec:?}: unit must be MIN or SEC"
            )));
        };
        let n: i64 = digits
            .parse()
            .map_err(|_| Error::config(format!("invalid time spec {spec:?}")))?;
        return Ok(now_ms + sign * n * unit_ms);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| Error::config(format!("invalid time spec {spec:?}")))
}
