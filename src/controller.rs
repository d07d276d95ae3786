//! The offload decision-and-execution core.
//!
//! Chooses where a run executes, drives the local pipeline or the remote
//! client for one or more repeated runs, times the batch, samples the battery
//! counter around it, and appends one metrics record per batch.

use std::{fmt, sync::Arc, time::Instant};

use rand::Rng as _;
use serde::Serialize;

use crate::{
    document::{DocumentSource, FsDocumentSource},
    energy::EnergySampler,
    error::OffloadError,
    metrics::{BatchMetrics, MetricsLog, RunMetrics},
    pipeline::{LocalOcrPipeline, OcrText},
    prelude::*,
    remote::RemoteOcrClient,
};

/// Where a run executes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Local,
    Remote,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Local => write!(f, "local"),
            Strategy::Remote => write!(f, "remote"),
        }
    }
}

/// How the strategy for a batch is chosen. Resolved exactly once per batch,
/// never hard-coded at a call site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrategyChoice {
    /// Operator-configured strategy.
    Fixed(Strategy),
    /// A fair coin toss per batch, for unbiased comparison runs.
    Random,
}

impl StrategyChoice {
    /// Resolve to a concrete strategy.
    pub fn resolve(self) -> Strategy {
        match self {
            StrategyChoice::Fixed(strategy) => strategy,
            StrategyChoice::Random => {
                if rand::rng().random_bool(0.5) {
                    Strategy::Local
                } else {
                    Strategy::Remote
                }
            }
        }
    }
}

/// One batch request.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub path: PathBuf,
    pub strategy: StrategyChoice,
    /// How many times to repeat the run. Configuration, not derived state.
    pub iterations: usize,
}

/// Everything a finished batch produced.
#[derive(Debug)]
pub struct BatchReport {
    pub strategy: Strategy,
    /// One entry per iteration, in run order.
    pub runs: Vec<RunMetrics>,
    pub batch: BatchMetrics,
    /// Text from the last successful iteration, if any.
    pub text: Option<OcrText>,
    /// Errors from failed iterations, for the operator.
    pub errors: Vec<String>,
}

/// Drives offload runs end to end.
pub struct OffloadController {
    documents: Arc<dyn DocumentSource>,
    pipeline: LocalOcrPipeline,
    remote: RemoteOcrClient,
    sampler: Box<dyn EnergySampler>,
    log: MetricsLog,
}

impl OffloadController {
    pub fn new(
        pipeline: LocalOcrPipeline,
        remote: RemoteOcrClient,
        sampler: Box<dyn EnergySampler>,
        log: MetricsLog,
    ) -> Self {
        Self {
            documents: Arc::new(FsDocumentSource),
            pipeline,
            remote,
            sampler,
            log,
        }
    }

    /// Substitute where documents come from, so batches can run against
    /// scripted documents.
    #[cfg(test)]
    fn with_document_source(mut self, documents: Arc<dyn DocumentSource>) -> Self {
        self.documents = documents;
        self
    }

    /// Execute a batch of repeated runs, strictly sequentially.
    ///
    /// Each iteration opens its own document handle, so scratch files are
    /// released per run. A failed iteration is reported through the returned
    /// metrics and errors; it never aborts the remaining iterations, and the
    /// controller is always ready for another batch afterwards. `on_run` is
    /// called once per iteration as its metrics are emitted.
    #[instrument(
        level = "debug",
        skip_all,
        fields(path = %request.path.display(), iterations = request.iterations)
    )]
    pub async fn execute(
        &mut self,
        request: &RunRequest,
        mut on_run: impl FnMut(&RunMetrics),
    ) -> Result<BatchReport, OffloadError> {
        let strategy = request.strategy.resolve();
        info!(%strategy, "strategy resolved");

        let battery_start = self.sampler.sample()?;
        let started = Instant::now();

        let mut runs = Vec::with_capacity(request.iterations);
        let mut errors = Vec::new();
        let mut text = None;
        let mut file_size = 0u64;
        let mut page_count = 0usize;
        let mut completed = 0usize;

        for run_idx in 0..request.iterations {
            let run_started = Instant::now();
            let outcome = self.run_once(&request.path, strategy).await;
            let elapsed_ms = run_started.elapsed().as_millis() as u64;

            let metrics = match outcome {
                Ok(run) => {
                    file_size = run.file_size;
                    page_count = run.page_count;
                    completed += 1;
                    let metrics = RunMetrics {
                        strategy,
                        run_idx,
                        elapsed_ms,
                        pages_ok: run.text.pages_ok,
                        page_count: run.text.page_count,
                        failed: false,
                    };
                    text = Some(run.text);
                    metrics
                }
                Err(err) => {
                    error!(run_idx, "iteration failed: {err}");
                    errors.push(err.to_string());
                    // A failed iteration may not have gotten far enough to
                    // learn the page count; report zero rather than a value
                    // borrowed from another iteration.
                    RunMetrics {
                        strategy,
                        run_idx,
                        elapsed_ms,
                        pages_ok: 0,
                        page_count: 0,
                        failed: true,
                    }
                }
            };
            on_run(&metrics);
            runs.push(metrics);
        }

        // The clock stops only once the last iteration is terminal.
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let battery_end = self.sampler.sample()?;

        let batch = BatchMetrics {
            mode: strategy,
            elapsed_ms,
            file_size_mb: cumulative_mb(file_size, completed),
            battery_delta: battery_start - battery_end,
            page_count,
            repeat_jobs: request.iterations,
        };
        // A batch where nothing completed produced no measurement worth
        // comparing, so it stays out of the log.
        if completed > 0 {
            self.log.append(&batch)?;
        }

        Ok(BatchReport {
            strategy,
            runs,
            batch,
            text,
            errors,
        })
    }

    /// Run one iteration end to end. The document handle lives only within
    /// this call.
    async fn run_once(
        &self,
        path: &Path,
        strategy: Strategy,
    ) -> Result<CompletedRun, OffloadError> {
        let document = self.documents.open(path).await?;
        let file_size = document.file_size();
        let page_count = document.page_count();

        let text = match strategy {
            Strategy::Local => self.pipeline.run(document).await?,
            Strategy::Remote => self.remote.run_to_completion(document).await?,
        };
        if text.pages_ok == 0 && text.page_count > 0 {
            return Err(OffloadError::io(anyhow!("no page produced any text")));
        }

        Ok(CompletedRun {
            text,
            file_size,
            page_count,
        })
    }
}

struct CompletedRun {
    text: OcrText,
    file_size: u64,
    page_count: usize,
}

/// Cumulative megabytes processed across completed iterations.
///
/// We report bytes actually processed (file size × completed runs) rather
/// than file size × requested runs: a failed iteration processed nothing
/// worth counting.
fn cumulative_mb(file_size: u64, completed: usize) -> f64 {
    (file_size as f64 * completed as f64) / (1024.0 * 1024.0)
}
