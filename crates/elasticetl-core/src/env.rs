//! `${VAR}` environment interpolation for credential-bearing strings.

use std::sync::OnceLock;

use regex::Regex;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Replaces every `${VAR}` token with the process environment value at
/// call time. Unset variables leave the literal token intact.
pub fn expand_env(input: &str) -> String {
    var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}
