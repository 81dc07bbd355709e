//! Cover Studio job runner (cs-jobs) - command-line entry point
//!
//! Segments a WAV file, runs every segment through the stage pipeline under
//! the configured accelerator budget, stitches the result and prints the final
//! job record as JSON. Ctrl+C cancels the job cooperatively.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::Parser;
use cs_common::config::LoggingConfig;
use cs_common::events::{JobEvent, JobStatus};
use cs_common::FadeCurve;
use cs_jobs::audio::{AudioSource, WavSource};
use cs_jobs::config::ServiceConfig;
use cs_jobs::models::{FailurePolicy, JobConfig};
use cs_jobs::segmenter;
use cs_jobs::stages::StageRegistry;
use cs_jobs::JobManager;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cs-jobs
#[derive(Parser, Debug)]
#[command(name = "cs-jobs")]
#[command(about = "Segmented cover generation job runner")]
#[command(version)]
struct Args {
    /// Source audio (WAV)
    input: PathBuf,

    /// Copy the assembled result here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (overrides CS_JOBS_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Segment length in seconds
    #[arg(long)]
    segment_length: Option<f64>,

    /// Overlap between segments in seconds
    #[arg(long)]
    overlap: Option<f64>,

    /// Segments allowed to run at once
    #[arg(long, env = "CS_JOBS_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Failure policy: abort-segment or abort-job
    #[arg(long)]
    policy: Option<String>,

    /// Crossfade curve: linear, exponential, logarithmic, s_curve, equal_power
    #[arg(long)]
    curve: Option<String>,

    /// Assemble completed segments even if some failed
    #[arg(long)]
    allow_partial: bool,
}

impl Args {
    fn job_config(&self, defaults: &JobConfig) -> Result<JobConfig> {
        let mut config = defaults.clone();
        if let Some(length) = self.segment_length {
            config.segment_length = length;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_segments = max;
        }
        if let Some(policy) = &self.policy {
            config.failure_policy = policy.parse::<FailurePolicy>()?;
        }
        if let Some(curve) = &self.curve {
            config.crossfade_curve = curve.parse::<FadeCurve>()?;
        }
        if self.allow_partial {
            config.allow_partial_result = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (service_config, config_source) =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&service_config.logging)?;

    info!(
        source = ?config_source,
        work_dir = %service_config.work_dir.display(),
        accelerator_slots = ?service_config.accelerator_slots,
        "Starting cs-jobs"
    );

    let job_config = args.job_config(&service_config.defaults)?;
    let manager = JobManager::from_config(&service_config, StageRegistry::with_builtin_pipeline());

    let source = Arc::new(
        WavSource::open(&args.input)
            .with_context(|| format!("Failed to open {}", args.input.display()))?,
    );
    let segments =
        segmenter::segment(source.duration(), job_config.segment_length, job_config.overlap)?;
    info!(
        input = %args.input.display(),
        duration = source.duration(),
        segments = segments.len(),
        "Source segmented"
    );

    let events = manager.subscribe();
    let shutdown = CancellationToken::new();
    let id = manager.submit_with_token(job_config, source, segments, Some(&shutdown))?;

    tokio::spawn(log_events(events));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let job = manager.wait(id).await?;

    if let (Some(output), Some(result)) = (&args.output, &job.result_path) {
        copy_result(result, output).await?;
        info!(output = %output.display(), "Result written");
    }

    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status != JobStatus::Completed {
        bail!("job {} ended {}", id, job.status);
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(JobEvent::ProgressUpdated {
                progress,
                current_stage,
                message,
                ..
            }) => {
                info!(progress = format!("{:.1}%", progress), stage = %current_stage, "{}", message);
            }
            Ok(JobEvent::SegmentFinished {
                segment_index,
                outcome,
                ..
            }) => {
                info!(segment_index, outcome = ?outcome, "Segment finished");
            }
            Ok(JobEvent::JobFinished { status, .. }) => {
                info!(status = %status, "Job finished");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn copy_result(result: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::copy(result, output)
        .await
        .with_context(|| format!("Failed to copy result to {}", output.display()))?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling job");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling job");
        },
    }
}
