//! The dispatcher: owns every pipeline's lifetime.
//!
//! Each installed pipeline gets an independent ticker task. A tick runs
//! one execution: parallel endpoint fetches with channel fan-in,
//! sequential per-result transforms, then a concurrent sink fan-out with
//! a barrier join. The loop awaits the execution before asking the
//! ticker again, so a pipeline never runs two ticks concurrently; missed
//! deadlines are coalesced by the ticker itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use elasticetl_core::{Error, PipelineSpec, Sink};
use elasticetl_io::{create_sink, ElasticSource};
use elasticetl_tx::history::HistoryRing;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long `remove`/`shutdown` wait for a pipeline's active tick before
/// forcing teardown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct PipelineStatus {
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

struct Pipeline {
    spec: Arc<PipelineSpec>,
    source: ElasticSource,
    sinks: Vec<Arc<dyn Sink>>,
    history: Mutex<HistoryRing>,
    status: Mutex<PipelineStatus>,
}

struct PipelineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    pipeline: Arc<Pipeline>,
}

/// Registry of running pipelines, keyed by name. The lock is only held
/// for map access, never across I/O.
#[derive(Default)]
pub struct Runner {
    pipelines: RwLock<HashMap<String, PipelineHandle>>,
}

impl Runner {
    pub fn new() -> Self {
        Runner::default()
    }

    /// Installs (or replaces) a pipeline. Replacing cancels the old
    /// instance, awaits its active tick with a bounded drain, and then
    /// starts a fresh ticker. Installing a disabled spec just removes
    /// any running instance.
    pub async fn install(&self, spec: PipelineSpec) -> Result<(), Error> {
        spec.validate()?;
        if !spec.enabled {
            info!(pipeline = %spec.name, "pipeline disabled, not scheduling");
            self.remove(&spec.name).await;
            return Ok(());
        }
        self.remove(&spec.name).await;

        let name = spec.name.clone();
        let source = ElasticSource::new(&name, spec.extract.clone())?;
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(spec.load.streams.len());
        for stream in &spec.load.streams {
            sinks.push(Arc::from(create_sink(stream, &spec.load.metrics)?));
        }
        let history_capacity = if spec.transform.stateless {
            0
        } else {
            spec.transform.previous_results_sets
        };
        let pipeline = Arc::new(Pipeline {
            spec: Arc::new(spec),
            source,
            sinks,
            history: Mutex::new(HistoryRing::new(history_capacity)),
            status: Mutex::new(PipelineStatus::default()),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_pipeline(pipeline.clone(), cancel.clone()));
        self.pipelines
            .write()
            .expect("pipeline registry poisoned")
            .insert(name, PipelineHandle {
                cancel,
                task,
                pipeline,
            });
        Ok(())
    }

    /// Stops and forgets a pipeline. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let handle = self
            .pipelines
            .write()
            .expect("pipeline registry poisoned")
            .remove(name);
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                drain(handle.task, name).await;
                close_sinks(&handle.pipeline).await;
                true
            }
            None => false,
        }
    }

    /// Cancels every pipeline, waits bounded for each to drain, and
    /// closes their sinks.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, PipelineHandle)> = self
            .pipelines
            .write()
            .expect("pipeline registry poisoned")
            .drain()
            .collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (name, handle) in handles {
            drain(handle.task, &name).await;
            close_sinks(&handle.pipeline).await;
            info!(pipeline = %name, "pipeline stopped");
        }
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines
            .read()
            .expect("pipeline registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Reconciles the registry against a full configuration: installs
    /// or replaces every configured pipeline and removes pipelines the
    /// configuration no longer names.
    pub async fn apply(&self, config: &elasticetl_core::Config) -> Result<(), Error> {
        config.validate()?;
        for spec in &config.pipelines {
            self.install(spec.clone()).await?;
        }
        let configured: std::collections::HashSet<&str> =
            config.pipelines.iter().map(|p| p.name.as_str()).collect();
        let stale: Vec<String> = self
            .pipeline_names()
            .into_iter()
            .filter(|name| !configured.contains(name.as_str()))
            .collect();
        for name in stale {
            info!(pipeline = %name, "removing pipeline absent from new configuration");
            self.remove(&name).await;
        }
        Ok(())
    }

    /// Snapshot of a pipeline's history ring, oldest first. `None` for
    /// unknown pipelines; empty for stateless ones.
    pub fn history(&self, name: &str) -> Option<Vec<Vec<elasticetl_core::TransformedBatch>>> {
        let registry = self.pipelines.read().expect("pipeline registry poisoned");
        registry.get(name).map(|handle| {
            handle
                .pipeline
                .history
                .lock()
                .expect("history lock poisoned")
                .snapshot()
        })
    }

    /// Point-in-time copy of every pipeline's counters.
    pub fn status(&self) -> HashMap<String, PipelineStatus> {
        self.pipelines
            .read()
            .expect("pipeline registry poisoned")
            .iter()
            .map(|(name, handle)| {
                let status = handle
                    .pipeline
                    .status
                    .lock()
                    .expect("status lock poisoned")
                    .clone();
                (name.clone(), status)
            })
            .collect()
    }
}

async fn drain(task: JoinHandle<()>, name: &str) {
    let mut task = task;
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
        warn!(pipeline = %name, "drain timed out, forcing teardown");
        task.abort();
    }
}

async fn close_sinks(pipeline: &Pipeline) {
    for sink in &pipeline.sinks {
        if let Err(e) = sink.close().await {
            warn!(kind = sink.kind(), error = %e, "sink close failed");
        }
    }
}

async fn run_pipeline(pipeline: Arc<Pipeline>, cancel: CancellationToken) {
    let name = pipeline.spec.name.clone();
    let mut ticker = tokio::time::interval(Duration::from_secs(pipeline.spec.interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        pipeline = %name,
        interval_secs = pipeline.spec.interval_secs,
        "pipeline started"
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match run_once(&pipeline, &cancel).await {
            Ok(()) => {
                counter!(
                    "elasticetl_pipeline_runs_total", 1,
                    "pipeline" => name.clone(), "outcome" => "success"
                );
                let mut status = pipeline.status.lock().expect("status lock poisoned");
                status.runs_succeeded += 1;
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                let message = e.causes().join("; ");
                error!(pipeline = %name, error = %message, "tick failed");
                counter!(
                    "elasticetl_pipeline_runs_total", 1,
                    "pipeline" => name.clone(), "outcome" => "failure"
                );
                let mut status = pipeline.status.lock().expect("status lock poisoned");
                status.runs_failed += 1;
                status.last_error = Some(message);
                status.last_error_at = Some(Utc::now());
            }
        }
    }
}

/// One execution: fetch all endpoints in parallel, transform in endpoint
/// order, fan out to every sink.
async fn run_once(pipeline: &Arc<Pipeline>, cancel: &CancellationToken) -> Result<(), Error> {
    let endpoints = pipeline.source.endpoint_count();
    let (result_tx, mut result_rx) = mpsc::channel(endpoints);
    let (error_tx, mut error_rx) = mpsc::channel(endpoints);

    let mut fetches = Vec::with_capacity(endpoints);
    for index in 0..endpoints {
        let pipeline = pipeline.clone();
        let result_tx = result_tx.clone();
        let error_tx = error_tx.clone();
        let cancel = cancel.clone();
        fetches.push(tokio::spawn(async move {
            match pipeline.source.fetch(index, &cancel).await {
                Ok(result) => {
                    let _ = result_tx.send(result).await;
                }
                Err(e) => {
                    let _ = error_tx.send(e).await;
                }
            }
        }));
    }
    drop(result_tx);
    drop(error_tx);
    for fetch in fetches {
        let _ = fetch.await;
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut results = Vec::new();
    while let Ok(result) = result_rx.try_recv() {
        results.push(result);
    }
    let mut errors = Vec::new();
    while let Ok(e) = error_rx.try_recv() {
        errors.push(e);
    }
    if results.is_empty() {
        return Err(Error::Extract(errors));
    }
    for e in &errors {
        warn!(pipeline = %pipeline.spec.name, error = %e, "endpoint failed");
    }
    results.sort_by_key(|r| r.metadata.endpoint_index);

    let mut batches = Vec::with_capacity(results.len());
    for result in results {
        batches.push(elasticetl_tx::transform(result, &pipeline.spec.transform)?);
    }

    if !pipeline.spec.transform.stateless && pipeline.spec.transform.previous_results_sets > 0 {
        pipeline
            .history
            .lock()
            .expect("history lock poisoned")
            .push(batches.clone());
    }

    let shared = Arc::new(batches);
    let mut deliveries = Vec::with_capacity(pipeline.sinks.len());
    for sink in &pipeline.sinks {
        let sink = sink.clone();
        let shared = shared.clone();
        let cancel = cancel.clone();
        deliveries.push(tokio::spawn(async move {
            let outcome = sink.load(&shared, &cancel).await;
            (sink.kind(), outcome)
        }));
    }
    let mut failures = Vec::new();
    for delivery in deliveries {
        match delivery.await {
            Ok((_, Ok(()))) => {}
            Ok((kind, Err(e))) => failures.push((kind.to_string(), e)),
            Err(join_err) => failures.push((
                "sink".to_string(),
                Error::transform(format!("sink task aborted: {join_err}")),
            )),
        }
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Sink(failures))
    }
}
