//! Tabular reshaping of the flattened map.
//!
//! Headers are the sorted, de-duplicated de-indexed keys (every `[i]`
//! stripped). Rows enumerate the Cartesian product of the observed array
//! indices: one row per combination of one index chosen at every array
//! path. Cells resolve through three lookups: the header verbatim, the
//! header with the combination's indices substituted back in, and
//! finally any key whose de-indexed form and embedded indices agree with
//! the combination.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use elasticetl_core::FlatMap;
use regex::Regex;
use serde_json::Value;

fn bracket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

/// Strips every `[<int>]` segment from a flat-map key.
pub fn deindex(key: &str) -> String {
    let stripped = bracket_pattern().replace_all(key, "");
    stripped.trim_start_matches('.').to_string()
}

/// `(de-indexed array path, index)` for every bracket occurrence in
/// `key`, outermost first.
fn bracket_segments(key: &str) -> Vec<(String, usize)> {
    bracket_pattern()
        .captures_iter(key)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let idx = caps.get(1)?.as_str().parse().ok()?;
            Some((deindex(&key[..whole.start()]), idx))
        })
        .collect()
}

/// Derives `(headers, rows)` from a flattened map.
pub fn tabulate(flat: &FlatMap) -> (Vec<String>, Vec<Vec<String>>) {
    let headers: Vec<String> = flat
        .keys()
        .map(|k| deindex(k))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut array_paths: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    for key in flat.keys() {
        for (path, idx) in bracket_segments(key) {
            array_paths.entry(path).or_default().insert(idx);
        }
    }

    if array_paths.is_empty() {
        let row = headers
            .iter()
            .map(|h| flat.get(h).map(render_value).unwrap_or_default())
            .collect();
        return (headers, vec![row]);
    }

    // Lexicographic path order, ascending indices, last path varying
    // fastest: row order is stable and reproducible.
    let paths: Vec<(&str, Vec<usize>)> = array_paths
        .iter()
        .map(|(path, idxs)| (path.as_str(), idxs.iter().copied().collect()))
        .collect();

    let mut rows = Vec::new();
    let mut counters = vec![0usize; paths.len()];
    loop {
        let assignment: Vec<(&str, usize)> = paths
            .iter()
            .zip(&counters)
            .map(|((path, idxs), &c)| (*path, idxs[c]))
            .collect();
        rows.push(
            headers
                .iter()
                .map(|h| lookup_cell(flat, h, &assignment))
                .collect(),
        );

        let mut pos = paths.len();
        loop {
            if pos == 0 {
                return (headers, rows);
            }
            pos -= 1;
            counters[pos] += 1;
            if counters[pos] < paths[pos].1.len() {
                break;
            }
            counters[pos] = 0;
        }
    }
}

fn lookup_cell(flat: &FlatMap, header: &str, assignment: &[(&str, usize)]) -> String {
    if let Some(value) = flat.get(header) {
        return render_value(value);
    }
    if let Some(value) = flat.get(&specific_key(header, assignment)) {
        return render_value(value);
    }
    for (key, value) in flat {
        if deindex(key) != header {
            continue;
        }
        let agrees = bracket_segments(key)
            .iter()
            .all(|(path, idx)| assignment.iter().any(|(p, i)| p == path && i == idx));
        if agrees {
            return render_value(value);
        }
    }
    String::new()
}

/// Reinstates the combination's indices into a de-indexed header,
/// longest array path first so inner substitutions cannot shadow outer
/// ones.
fn specific_key(header: &str, assignment: &[(&str, usize)]) -> String {
    let mut ordered: Vec<(&str, usize)> = assignment.to_vec();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut key = header.to_string();
    for (path, idx) in ordered {
        if path.is_empty() {
            key = if key.is_empty() {
                format!("[{idx}]")
            } else {
                format!("[{idx}].{key}")
            };
        } else if let Some(pos) = key.find(path) {
            key.insert_str(pos + path.len(), &format!("[{idx}]"));
        }
    }
    key
}

/// Canonical textual cell form: floats render fixed-point (never
/// exponential), nulls render empty.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{f}")
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        structured => structured.to_string(),
    }
}
