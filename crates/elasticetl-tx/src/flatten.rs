//! JSON path selection and recursive flattening.
//!
//! Flattening binds every scalar in the selected subtree to a
//! dotted/indexed path: object members join with `.`, array elements
//! append `[i]`. An object with a single member whose lowercased name is
//! `value` collapses into its parent prefix, so Elasticsearch metric
//! aggregations like `{"avg_response_time":{"value":125.5}}` flatten to
//! `avg_response_time`.

use elasticetl_core::FlatMap;
use serde_json::Value;

/// Resolves a dotted path inside `body`. Numeric segments index into
/// arrays; an empty path selects the whole body; a missing path yields
/// `None` (which flattens to an empty map, not an error).
pub fn select<'a>(body: &'a Value, json_path: &str) -> Option<&'a Value> {
    let path = json_path.trim();
    if path.is_empty() {
        return Some(body);
    }
    let mut current = body;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Flattens a subtree into path-keyed scalars.
pub fn flatten(root: &Value) -> FlatMap {
    let mut out = FlatMap::new();
    flatten_into(root, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut FlatMap) {
    match value {
        Value::Object(map) => {
            // Single-member objects named "value" collapse into the parent.
            if map.len() == 1 {
                if let Some((key, child)) = map.iter().next() {
                    if key.eq_ignore_ascii_case("value") {
                        let bound = if prefix.is_empty() { "value" } else { prefix };
                        flatten_into(child, bound, out);
                        return;
                    }
                }
            }
            for (key, child) in map {
                let child_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &child_prefix, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, &format!("{prefix}[{i}]"), out);
            }
        }
        scalar => {
            let key = if prefix.is_empty() {
                "value".to_string()
            } else {
                prefix.to_string()
            };
            out.insert(key, scalar.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_nested_path_with_array_index() {
        let body = json!({"aggregations": {"services": {"buckets": [{"key": "a"}, {"key": "b"}]}}});
        let subtree = select(&body, "aggregations.services.buckets.1").unwrap();
        assert_eq!(subtree, &json!({"key": "b"}));
    }

    #[test]
    fn empty_path_selects_whole_body() {
        let body = json!({"hits": 3});
        assert_eq!(select(&body, "").unwrap(), &body);
        assert_eq!(select(&body, "  ").unwrap(), &body);
    }

    #[test]
    fn missing_path_yields_none() {
        let body = json!({"a": {"b": 1}});
        assert!(select(&body, "a.c").is_none());
        assert!(select(&body, "a.b.c").is_none());
    }

    #[test]
    fn value_only_objects_collapse_into_parent() {
        let subtree = json!({"avg_response_time": {"value": 125.5}});
        let flat = flatten(&subtree);
        assert_eq!(flat.get("avg_response_time"), Some(&json!(125.5)));
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn collapse_is_case_insensitive_and_recursive() {
        let subtree = json!({"p95": {"VALUE": {"value": 10}}});
        let flat = flatten(&subtree);
        assert_eq!(flat.get("p95"), Some(&json!(10)));
    }

    #[test]
    fn multi_member_objects_containing_value_flatten_normally() {
        let subtree = json!({"m": {"value": 1, "count": 2}});
        let flat = flatten(&subtree);
        assert_eq!(flat.get("m.value"), Some(&json!(1)));
        assert_eq!(flat.get("m.count"), Some(&json!(2)));
    }

    #[test]
    fn arrays_embed_bracketed_indices() {
        let subtree = json!([{"hosts": {"buckets": [{"cpu": 1.5}, {"cpu": 2.5}]}}]);
        let flat = flatten(&subtree);
        assert_eq!(flat.get("[0].hosts.buckets[0].cpu"), Some(&json!(1.5)));
        assert_eq!(flat.get("[0].hosts.buckets[1].cpu"), Some(&json!(2.5)));
    }

    #[test]
    fn root_scalar_binds_to_value() {
        assert_eq!(flatten(&json!(42)).get("value"), Some(&json!(42)));
        let collapsed = flatten(&json!({"value": 7}));
        assert_eq!(collapsed.get("value"), Some(&json!(7)));
    }

    #[test]
    fn flatten_is_idempotent_on_flat_shapes() {
        let subtree = json!({"a": 1, "b.c": "x"});
        let once = flatten(&subtree);
        let again = flatten(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, again);
    }
}
