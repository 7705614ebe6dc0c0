//! Error taxonomy shared by every pipeline stage.
//!
//! Each stage returns its own variant; the dispatcher translates them into
//! per-pipeline counters and keeps the ticker loop alive. The binary
//! boundary wraps everything in `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed query template, time spec, conversion spec, or stream
    /// configuration. Fatal to the run that tried to use it.
    #[error("config: {0}")]
    Config(String),

    /// HTTP 4xx, or a 5xx that survived every retry.
    #[error("upstream {url} returned {status}: {body_prefix}")]
    Upstream {
        url: String,
        status: u16,
        body_prefix: String,
    },

    /// Transport-level failure after retries were exhausted.
    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },

    /// Every configured endpoint failed; the tick fails.
    #[error("all {} endpoint(s) failed", .0.len())]
    Extract(Vec<Error>),

    /// JSON parse, conversion failure, or reshaping error; fails the tick.
    #[error("transform: {0}")]
    Transform(String),

    /// Aggregate of per-sink failures. Other sinks still ran.
    #[error("{} sink(s) failed", .0.len())]
    Sink(Vec<(String, Error)>),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Error::Transform(msg.into())
    }

    /// Flattens an aggregate into the per-cause messages for logging.
    pub fn causes(&self) -> Vec<String> {
        match self {
            Error::Extract(errs) => errs.iter().map(|e| e.to_string()).collect(),
            Error::Sink(errs) => errs
                .iter()
                .map(|(kind, e)| format!("{kind}: {e}"))
                .collect(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_display_counts_causes() {
        let err = Error::Extract(vec![
            Error::Transport {
                url: "http://a".into(),
                message: "refused".into(),
            },
            Error::Upstream {
                url: "http://b".into(),
                status: 404,
                body_prefix: "not found".into(),
            },
        ]);
        assert_eq!(err.to_string(), "all 2 endpoint(s) failed");
        assert_eq!(err.causes().len(), 2);
    }

    #[test]
    fn sink_causes_carry_kind() {
        let err = Error::Sink(vec![("csv_file".into(), Error::config("bad path"))]);
        assert_eq!(err.causes(), vec!["csv_file: config: bad path"]);
    }
}
