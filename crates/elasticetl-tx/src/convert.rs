//! Typed and byte-unit conversions over the flattened map.
//!
//! A rule's `field` is tried as a regular expression first; when it
//! compiles, every matching key is rewritten in place, otherwise the
//! field names a single literal key. A missing literal key is a no-op;
//! a value the conversion cannot parse fails the whole tick.

use elasticetl_core::{ByteUnit, ConversionSpec, Error, FlatMap, TypeName};
use regex::Regex;
use serde_json::Value;

/// Replaces every null with integer `0`, recursing through any nested
/// structure that survived flattening. Idempotent; non-null values are
/// untouched.
pub fn substitute_zeros_for_null(map: &mut FlatMap) {
    for value in map.values_mut() {
        substitute_value(value);
    }
}

fn substitute_value(value: &mut Value) {
    match value {
        Value::Null => *value = Value::from(0),
        Value::Object(map) => {
            for child in map.values_mut() {
                substitute_value(child);
            }
        }
        Value::Array(items) => {
            for child in items {
                substitute_value(child);
            }
        }
        _ => {}
    }
}

/// Applies every conversion rule in order.
pub fn apply(map: &mut FlatMap, rules: &[ConversionSpec]) -> Result<(), Error> {
    for rule in rules {
        let keys: Vec<String> = match Regex::new(rule.field()) {
            Ok(re) => map.keys().filter(|k| re.is_match(k)).cloned().collect(),
            Err(_) => {
                if map.contains_key(rule.field()) {
                    vec![rule.field().to_string()]
                } else {
                    Vec::new()
                }
            }
        };
        for key in keys {
            if let Some(value) = map.get_mut(&key) {
                let converted = convert_value(value, rule)
                    .map_err(|reason| Error::transform(format!("field {key:?}: {reason}")))?;
                *value = converted;
            }
        }
    }
    Ok(())
}

fn convert_value(value: &Value, rule: &ConversionSpec) -> Result<Value, String> {
    match rule {
        // `from` is advisory; coercion keys off the actual value type.
        ConversionSpec::ConvertType { to, .. } => convert_type(value, *to),
        ConversionSpec::ConvertToKb { from_unit, .. } => to_unit(value, *from_unit, ByteUnit::Kb),
        ConversionSpec::ConvertToMb { from_unit, .. } => to_unit(value, *from_unit, ByteUnit::Mb),
        ConversionSpec::ConvertToGb { from_unit, .. } => to_unit(value, *from_unit, ByteUnit::Gb),
    }
}

fn convert_type(value: &Value, to: TypeName) -> Result<Value, String> {
    // Nulls pass through untouched; substitution runs before conversions.
    if value.is_null() {
        return Ok(Value::Null);
    }
    match to {
        TypeName::String => match value {
            Value::String(s) => Ok(Value::from(s.clone())),
            Value::Bool(b) => Ok(Value::from(b.to_string())),
            Value::Number(n) => Ok(Value::from(render_number(n))),
            other => Err(format!("cannot convert {other} to string")),
        },
        TypeName::Int => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::from(u))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::from(f.trunc() as i64))
                } else {
                    Err(format!("cannot convert {n} to int"))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("cannot parse {s:?} as int")),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            other => Err(format!("cannot convert {other} to int")),
        },
        TypeName::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(finite_number)
                .ok_or_else(|| format!("cannot convert {n} to float")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(finite_number)
                .ok_or_else(|| format!("cannot parse {s:?} as float")),
            Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
            other => Err(format!("cannot convert {other} to float")),
        },
        TypeName::Bool => match value {
            Value::Bool(b) => Ok(Value::from(*b)),
            Value::Number(n) => Ok(Value::from(n.as_f64().map(|f| f != 0.0).unwrap_or(true))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::from(true)),
                "false" | "f" | "0" => Ok(Value::from(false)),
                _ => Err(format!("cannot parse {s:?} as bool")),
            },
            other => Err(format!("cannot convert {other} to bool")),
        },
    }
}

fn to_unit(value: &Value, from: ByteUnit, target: ByteUnit) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let quantity = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("cannot convert {value} from {from:?}"))?;
    let bytes = quantity * from.bytes_factor();
    finite_number(bytes / target.bytes_factor())
        .ok_or_else(|| format!("unit conversion of {value} overflowed"))
}

fn finite_number(f: f64) -> Option<Value> {
    serde_json::Number::from_f64(f).map(Value::Number)
}

fn render_number(n: &serde_json::Number) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_of(entries: &[(&str, Value)]) -> FlatMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitution_replaces_nulls_and_is_idempotent() {
        let mut map = map_of(&[
            ("a", Value::Null),
            ("b", json!(3.5)),
            ("c", json!({"inner": null})),
        ]);
        substitute_zeros_for_null(&mut map);
        assert_eq!(map.get("a"), Some(&json!(0)));
        assert_eq!(map.get("b"), Some(&json!(3.5)));
        assert_eq!(map.get("c"), Some(&json!({"inner": 0})));

        let before = map.clone();
        substitute_zeros_for_null(&mut map);
        assert_eq!(map, before);
    }

    #[test]
    fn convert_type_string_to_int_and_float_truncation() {
        let mut map = map_of(&[("a", json!("42")), ("b", json!(-3.9))]);
        let rules = [
            ConversionSpec::ConvertType {
                field: "a".into(),
                from: None,
                to: TypeName::Int,
            },
            ConversionSpec::ConvertType {
                field: "b".into(),
                from: None,
                to: TypeName::Int,
            },
        ];
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("a"), Some(&json!(42)));
        // Truncation is toward zero.
        assert_eq!(map.get("b"), Some(&json!(-3)));
    }

    #[test]
    fn convert_type_bool_parsing() {
        let mut map = map_of(&[("x", json!("t")), ("y", json!(0)), ("z", json!(2.5))]);
        let rules: Vec<ConversionSpec> = ["x", "y", "z"]
            .iter()
            .map(|field| ConversionSpec::ConvertType {
                field: (*field).into(),
                from: None,
                to: TypeName::Bool,
            })
            .collect();
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("x"), Some(&json!(true)));
        assert_eq!(map.get("y"), Some(&json!(false)));
        assert_eq!(map.get("z"), Some(&json!(true)));
    }

    #[test]
    fn unparseable_value_fails_the_batch() {
        let mut map = map_of(&[("a", json!("not a number"))]);
        let rules = [ConversionSpec::ConvertType {
            field: "a".into(),
            from: None,
            to: TypeName::Int,
        }];
        let err = apply(&mut map, &rules).unwrap_err();
        assert!(matches!(err, Error::Transform(_)), "got {err:?}");
    }

    #[test]
    fn regex_field_rewrites_every_match() {
        let mut map = map_of(&[
            ("hosts.buckets[0].mem_bytes", json!(2_097_152)),
            ("hosts.buckets[1].mem_bytes", json!(1_048_576)),
            ("doc_count", json!(5)),
        ]);
        let rules = [ConversionSpec::ConvertToMb {
            field: r"mem_bytes$".into(),
            from_unit: ByteUnit::Bytes,
        }];
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("hosts.buckets[0].mem_bytes"), Some(&json!(2.0)));
        assert_eq!(map.get("hosts.buckets[1].mem_bytes"), Some(&json!(1.0)));
        assert_eq!(map.get("doc_count"), Some(&json!(5)));
    }

    #[test]
    fn missing_literal_field_is_a_no_op() {
        let mut map = map_of(&[("present", json!(1))]);
        let rules = [ConversionSpec::ConvertToKb {
            // Unbalanced bracket: not a regex, and no such literal key.
            field: "absent[".into(),
            from_unit: ByteUnit::Gb,
        }];
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("present"), Some(&json!(1)));
    }

    #[test]
    fn unit_conversions_scale_by_1024() {
        let mut map = map_of(&[("kb", json!(3.0)), ("mb", json!(2.0))]);
        let rules = [
            // mb -> kb multiplies by 1024.
            ConversionSpec::ConvertToKb {
                field: "mb".into(),
                from_unit: ByteUnit::Mb,
            },
            // kb value interpreted as gb -> dividing twice by 1024.
            ConversionSpec::ConvertToGb {
                field: "kb".into(),
                from_unit: ByteUnit::Kb,
            },
        ];
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("mb"), Some(&json!(2048.0)));
        assert_eq!(map.get("kb"), Some(&json!(3.0 / (1024.0 * 1024.0))));
    }

    #[test]
    fn bytes_to_mb_divides_exactly() {
        let mut map = map_of(&[("m", json!(5_242_880))]);
        let rules = [ConversionSpec::ConvertToMb {
            field: "m".into(),
            from_unit: ByteUnit::Bytes,
        }];
        apply(&mut map, &rules).unwrap();
        assert_eq!(map.get("m"), Some(&json!(5.0)));
    }
}
