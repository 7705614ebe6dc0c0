//! Ordered include/exclude filtering over flattened keys.

use elasticetl_core::{FilterKind, FilterSpec, FlatMap};
use regex::Regex;

enum Matcher {
    Pattern(Regex),
    /// Fallback when the pattern does not compile as a regex.
    Literal(String),
}

impl Matcher {
    fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Matcher::Pattern(re),
            Err(_) => Matcher::Literal(pattern.to_string()),
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(key),
            Matcher::Literal(literal) => literal == key,
        }
    }
}

/// Applies `filters` in order. With any `include` present the working set
/// starts empty: includes add matching source keys, excludes strike from
/// the working set. Without includes the working set starts as a full
/// copy and excludes strike matches.
pub fn apply(source: &FlatMap, filters: &[FilterSpec]) -> FlatMap {
    if filters.is_empty() {
        return source.clone();
    }
    let has_include = filters.iter().any(|f| f.kind == FilterKind::Include);
    let mut result = if has_include {
        FlatMap::new()
    } else {
        source.clone()
    };
    for filter in filters {
        let matcher = Matcher::new(&filter.pattern);
        match filter.kind {
            FilterKind::Include => {
                for (key, value) in source {
                    if matcher.matches(key) {
                        result.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
            FilterKind::Exclude => {
                result.retain(|key, _| !matcher.matches(key));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FlatMap {
        let mut map = FlatMap::new();
        map.insert("hosts.buckets[0].cpu".into(), json!(1.5));
        map.insert("hosts.buckets[0].mem".into(), json!(2048));
        map.insert("doc_count".into(), json!(10));
        map
    }

    fn filter(kind: FilterKind, pattern: &str) -> FilterSpec {
        FilterSpec {
            kind,
            pattern: pattern.into(),
        }
    }

    #[test]
    fn no_filters_copies_everything() {
        let source = sample();
        assert_eq!(apply(&source, &[]), source);
    }

    #[test]
    fn exclude_only_strikes_from_full_copy() {
        let result = apply(&sample(), &[filter(FilterKind::Exclude, r"\.mem$")]);
        assert_eq!(result.len(), 2);
        assert!(!result.contains_key("hosts.buckets[0].mem"));
    }

    #[test]
    fn include_then_exclude_yields_empty() {
        let filters = [
            filter(FilterKind::Include, "cpu"),
            filter(FilterKind::Exclude, "cpu"),
        ];
        assert!(apply(&sample(), &filters).is_empty());
    }

    #[test]
    fn exclude_then_include_yields_exactly_the_matches() {
        let filters = [
            filter(FilterKind::Exclude, "cpu"),
            filter(FilterKind::Include, "cpu"),
        ];
        let result = apply(&sample(), &filters);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("hosts.buckets[0].cpu"));
    }

    #[test]
    fn invalid_regex_degrades_to_exact_equality() {
        let mut source = sample();
        source.insert("oddly[named".into(), json!(1));
        let include = [filter(FilterKind::Include, "oddly[named")];
        let result = apply(&source, &include);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("oddly[named"));

        // An invalid exclude pattern that equals no key strikes nothing.
        let exclude = [filter(FilterKind::Exclude, "hosts.buckets[")];
        assert_eq!(apply(&source, &exclude), source);
    }

    #[test]
    fn bracketed_patterns_are_regexes_first() {
        // "[0]" is a character class, so the pattern matches plain "0"
        // digits, not the literal brackets.
        let filters = [filter(FilterKind::Include, r"buckets\[0\]")];
        let result = apply(&sample(), &filters);
        assert_eq!(result.len(), 2);
    }
}
