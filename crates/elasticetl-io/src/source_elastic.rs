//! The Elasticsearch endpoint caller.
//!
//! One logical fetch per endpoint index: the query template is expanded
//! for that endpoint's cluster, POSTed to `{url}/_search`, and the JSON
//! response is selected, flattened and filtered into an
//! [`ExtractResult`]. Transport failures and 5xx responses retry with a
//! linear one-second backoff per attempt; 4xx responses are terminal.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use elasticetl_core::{expand_env, Error, ExtractMetadata, ExtractResult, ExtractSpec};
use elasticetl_tx::{filter, flatten};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::query;

pub struct ElasticSource {
    pipeline: String,
    spec: ExtractSpec,
    client: reqwest::Client,
}

impl ElasticSource {
    pub fn new(pipeline: &str, spec: ExtractSpec) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(spec.timeout_secs))
            .danger_accept_invalid_certs(spec.insecure_tls)
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;
        Ok(ElasticSource {
            pipeline: pipeline.to_string(),
            spec,
            client,
        })
    }

    /// Endpoints actually issued; the shortest configured array bounds
    /// the fan-out.
    pub fn endpoint_count(&self) -> usize {
        self.spec.endpoint_count()
    }

    /// Runs one endpoint call to completion, including retries.
    pub async fn fetch(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ExtractResult, Error> {
        let url = self
            .spec
            .urls
            .get(index)
            .ok_or_else(|| Error::config(format!("no url at endpoint index {index}")))?;
        let cluster = self
            .spec
            .cluster_names
            .get(index)
            .ok_or_else(|| Error::config(format!("no cluster name at endpoint index {index}")))?;
        let processed_query = query::expand(
            &self.spec.query,
            cluster,
            self.spec.start_time.as_deref(),
            self.spec.end_time.as_deref(),
        )?;
        let search_url = format!("{}/_search", url.trim_end_matches('/'));
        let headers = self.build_headers(index)?;

        let body = self
            .send_with_retry(&search_url, &headers, &processed_query, cancel)
            .await?;
        let timestamp = Utc::now();

        if let Some(dump) = &self.spec.debug {
            if dump.enabled {
                self.dump_raw_response(&dump.path, index, &body);
            }
        }

        let parsed: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            Error::transform(format!("response from {search_url} is not valid JSON: {e}"))
        })?;
        // A missing path is an empty result set, not a failure.
        let flat = match flatten::select(&parsed, &self.spec.json_path) {
            Some(subtree) => flatten::flatten(subtree),
            None => {
                debug!(
                    pipeline = %self.pipeline,
                    json_path = %self.spec.json_path,
                    "json path matched nothing"
                );
                Default::default()
            }
        };
        let data = filter::apply(&flat, &self.spec.filters);

        Ok(ExtractResult {
            timestamp,
            source: url.clone(),
            data,
            metadata: ExtractMetadata {
                endpoint_index: index,
                endpoint: url.clone(),
                cluster: cluster.clone(),
                processed_query,
                original_query: self.spec.query.clone(),
                response_bytes: body.len(),
            },
        })
    }

    async fn send_with_retry(
        &self,
        search_url: &str,
        headers: &HeaderMap,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let send = self
                .client
                .post(search_url)
                .headers(headers.clone())
                .body(body.to_string())
                .send();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = send => outcome,
            };
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| Error::Transport {
                                url: search_url.to_string(),
                                message: e.to_string(),
                            });
                    }
                    if status.as_u16() >= 500 && attempt < self.spec.max_retries {
                        warn!(
                            pipeline = %self.pipeline,
                            url = %search_url,
                            status = status.as_u16(),
                            attempt,
                            "server error, will retry"
                        );
                    } else {
                        let text = response.text().await.unwrap_or_default();
                        return Err(Error::Upstream {
                            url: search_url.to_string(),
                            status: status.as_u16(),
                            body_prefix: text.chars().take(256).collect(),
                        });
                    }
                }
                Err(e) => {
                    if attempt >= self.spec.max_retries {
                        return Err(Error::Transport {
                            url: search_url.to_string(),
                            message: e.to_string(),
                        });
                    }
                    warn!(
                        pipeline = %self.pipeline,
                        url = %search_url,
                        error = %e,
                        attempt,
                        "transport failure, will retry"
                    );
                }
            }
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(u64::from(attempt))) => {}
            }
        }
    }

    fn build_headers(&self, index: usize) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.spec.auth_headers {
            if let Some(value) = auth.get(index) {
                if !value.trim().is_empty() {
                    let expanded = expand_env(value);
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&expanded).map_err(|e| {
                            Error::config(format!("auth header for endpoint {index}: {e}"))
                        })?,
                    );
                }
            }
        }
        if let Some(extra) = &self.spec.additional_headers {
            if let Some(list) = extra.get(index) {
                for raw in list {
                    let expanded = expand_env(raw);
                    let Some((name, value)) = expanded.split_once(':') else {
                        return Err(Error::config(format!(
                            "additional header {raw:?} is not of the form \"Name: value\""
                        )));
                    };
                    let name = HeaderName::from_bytes(name.trim().as_bytes())
                        .map_err(|e| Error::config(format!("header name in {raw:?}: {e}")))?;
                    let value = HeaderValue::from_str(value.trim())
                        .map_err(|e| Error::config(format!("header value in {raw:?}: {e}")))?;
                    headers.insert(name, value);
                }
            }
        }
        Ok(headers)
    }

    fn dump_raw_response(&self, dir: &str, index: usize, body: &[u8]) {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = Path::new(dir).join(format!(
            "{}_extract_{}_{}.json",
            self.pipeline, index, stamp
        ));
        let write = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, body));
        if let Err(e) = write {
            warn!(path = %path.display(), error = %e, "failed to write debug dump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn spec(url: String, max_retries: u32) -> ExtractSpec {
        ExtractSpec {
            query: r#"{"size":0,"term":{"cluster.name":"__CLUSTER__"}}"#.into(),
            urls: vec![url],
            cluster_names: vec!["test".into()],
            auth_headers: None,
            additional_headers: None,
            json_path: "aggregations.services.buckets".into(),
            filters: vec![],
            timeout_secs: 5,
            max_retries,
            start_time: None,
            end_time: None,
            insecure_tls: false,
            debug: None,
        }
    }

    /// Serves the given (status, body) responses, one connection each.
    async fn stub_server(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    502 => "Bad Gateway",
                    _ => "Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (url, hits, handle)
    }

    fn aggregation_body() -> String {
        r#"{"aggregations":{"services":{"buckets":[{"key":"api","latency":{"value":12.5}}]}}}"#
            .to_string()
    }

    #[tokio::test]
    async fn fetch_selects_flattens_and_records_metadata() {
        let (url, hits, _handle) = stub_server(vec![(200, aggregation_body())]).await;
        let source = ElasticSource::new("demo", spec(url.clone(), 0)).unwrap();
        let cancel = CancellationToken::new();
        let result = source.fetch(0, &cancel).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(result.source, url);
        assert_eq!(result.metadata.cluster, "test");
        assert!(result.metadata.processed_query.contains(r#""cluster.name":"test""#));
        assert!(result.metadata.original_query.contains("__CLUSTER__"));
        assert_eq!(result.data.get("[0].key"), Some(&serde_json::json!("api")));
        assert_eq!(
            result.data.get("[0].latency"),
            Some(&serde_json::json!(12.5))
        );
    }

    #[tokio::test]
    async fn server_errors_retry_until_success() {
        let (url, hits, _handle) = stub_server(vec![
            (502, String::new()),
            (502, String::new()),
            (200, aggregation_body()),
        ])
        .await;
        let source = ElasticSource::new("demo", spec(url, 2)).unwrap();
        let cancel = CancellationToken::new();
        let result = source.fetch(0, &cancel).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(result.data.len(), 2);
    }

    #[tokio::test]
    async fn client_errors_are_terminal() {
        let (url, hits, _handle) =
            stub_server(vec![(404, "no such index".into())]).await;
        let source = ElasticSource::new("demo", spec(url, 3)).unwrap();
        let cancel = CancellationToken::new();
        let err = source.fetch(0, &cancel).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        match err {
            Error::Upstream {
                status,
                body_prefix,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(body_prefix, "no such index");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_json_path_yields_empty_data() {
        let (url, _hits, _handle) = stub_server(vec![(200, r#"{"took":3}"#.into())]).await;
        let source = ElasticSource::new("demo", spec(url, 0)).unwrap();
        let cancel = CancellationToken::new();
        let result = source.fetch(0, &cancel).await.unwrap();
        assert!(result.data.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let source =
            ElasticSource::new("demo", spec("http://127.0.0.1:9".into(), 0)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source.fetch(0, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled), "got {err:?}");
    }
}
