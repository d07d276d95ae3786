//! The `run` subcommand.

use std::{sync::Arc, time::Duration};

use clap::{Args, ValueEnum};
use tokio::io::AsyncWriteExt as _;

use crate::{
    controller::{OffloadController, RunRequest, Strategy, StrategyChoice},
    energy::{EnergySampler, NullEnergySampler, SysfsEnergySampler},
    metrics::MetricsLog,
    pipeline::LocalOcrPipeline,
    prelude::*,
    raster::RasterOptions,
    remote::{PollPolicy, RemoteOcrClient},
    transport::HttpJobTransport,
    ui::Ui,
};

/// Strategy selection, as seen on the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum StrategyOpt {
    /// OCR on this machine.
    #[default]
    Local,
    /// Offload to the remote job service.
    Remote,
    /// Flip a coin per batch, for unbiased comparison runs.
    Random,
}

impl StrategyOpt {
    fn to_choice(self) -> StrategyChoice {
        match self {
            StrategyOpt::Local => StrategyChoice::Fixed(Strategy::Local),
            StrategyOpt::Remote => StrategyChoice::Fixed(Strategy::Remote),
            StrategyOpt::Random => StrategyChoice::Random,
        }
    }
}

/// Options for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunOpts {
    /// The PDF file to OCR.
    pub input_path: PathBuf,

    /// Where the OCR runs.
    #[clap(long, value_enum, default_value_t = StrategyOpt::Local)]
    pub strategy: StrategyOpt,

    /// URL of the remote OCR job endpoint. Required for the `remote` and
    /// `random` strategies.
    #[clap(long, env = "OCR_SERVICE_URL")]
    pub service_url: Option<String>,

    /// How many times to repeat the run.
    #[clap(long, default_value = "1")]
    pub iterations: usize,

    /// The tesseract language to recognize.
    #[clap(long, default_value = "eng")]
    pub lang: String,

    #[clap(flatten)]
    pub raster: RasterOptions,

    /// Seconds to wait between remote status polls.
    #[clap(long, default_value = "5")]
    pub poll_interval: u64,

    /// Give up on a remote job after this many polls. 0 polls forever.
    #[clap(long, default_value = "120")]
    pub max_polls: u32,

    /// Where to append batch metrics.
    #[clap(long, default_value = "offload-metrics.csv")]
    pub metrics_path: PathBuf,

    /// A power-supply sysfs directory with a charge counter. Autodetected
    /// when omitted.
    #[clap(long)]
    pub power_supply: Option<PathBuf>,

    /// Where to write the extracted text. Defaults to stdout.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

impl RunOpts {
    fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval),
            max_attempts: (self.max_polls > 0).then_some(self.max_polls),
        }
    }

    fn energy_sampler(&self) -> Box<dyn EnergySampler> {
        if let Some(dir) = &self.power_supply {
            return Box::new(SysfsEnergySampler::new(dir));
        }
        match SysfsEnergySampler::autodetect() {
            Some(sampler) => Box::new(sampler),
            None => {
                warn!("no battery charge counter found, energy deltas will read zero");
                Box::new(NullEnergySampler)
            }
        }
    }
}

/// Run the `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, opts: &RunOpts) -> Result<()> {
    if opts.iterations == 0 {
        return Err(anyhow!("--iterations must be at least 1"));
    }
    let endpoint = match (&opts.service_url, opts.strategy) {
        (Some(url), _) => url.clone(),
        // Never dialed when the strategy is fixed local.
        (None, StrategyOpt::Local) => String::new(),
        (None, strategy) => {
            return Err(anyhow!(
                "--strategy {:?} requires --service-url or OCR_SERVICE_URL",
                strategy
            ));
        }
    };

    let pipeline =
        LocalOcrPipeline::with_poppler_and_tesseract(opts.raster.clone(), &opts.lang);
    let remote = RemoteOcrClient::new(
        Arc::new(HttpJobTransport::new(endpoint)),
        opts.poll_policy(),
    );
    let mut controller = OffloadController::new(
        pipeline,
        remote,
        opts.energy_sampler(),
        MetricsLog::new(&opts.metrics_path),
    );

    let request = RunRequest {
        path: opts.input_path.clone(),
        strategy: opts.strategy.to_choice(),
        iterations: opts.iterations,
    };

    let pb = ui.new_progress_bar("📄", "OCRing document", opts.iterations as u64);
    let report = controller
        .execute(&request, |run| {
            pb.inc(1);
            debug!(
                run_idx = run.run_idx,
                elapsed_ms = run.elapsed_ms,
                failed = run.failed,
                "iteration finished"
            );
        })
        .await?;
    pb.finish_and_clear();

    ui.display_message(
        "✅",
        &format!(
            "{} batch: {}/{} iterations succeeded in {} ms ({} µ-units of charge)",
            report.strategy,
            report.runs.iter().filter(|run| !run.failed).count(),
            opts.iterations,
            report.batch.elapsed_ms,
            report.batch.battery_delta,
        ),
    );
    for message in &report.errors {
        ui.display_message("⚠️", message);
    }

    let text = match &report.text {
        Some(ocr) => {
            if !ocr.is_complete() {
                ui.display_message(
                    "⚠️",
                    &format!(
                        "only {}/{} pages produced text",
                        ocr.pages_ok, ocr.page_count
                    ),
                );
            }
            ocr.text.as_str()
        }
        None => {
            return Err(anyhow!(
                "all {} iterations failed: {}",
                opts.iterations,
                report.errors.join("; ")
            ));
        }
    };

    match &opts.output_path {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(text.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
