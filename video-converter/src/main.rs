//! Video Converter
//!
//! Runs one batch conversion pass over the catalog:
//! - Lists videos and their derivative links from the catalog database
//! - Downloads originals and produces the missing quality derivatives
//! - Uploads derivatives to remote storage and records their links
//! - Prints a summary of the run and exits
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


mod shutdown;

use anyhow::{anyhow, Result};
use clap::Parser;
use converter_config::{AppConfig, RunEnv};
use converter_logging::init_run_logging;
use converter_types::RunCounters;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use video_converter::catalog::CatalogSource;
use video_converter::retry::RetryConfig;
use video_converter::{
    progress, FfmpegEncoder, PgCatalog, PlatformCloud, RunScheduler, ScheduleMode,
    SchedulerSettings, Services, StopReason,
};

/// How long in-flight work may take to wind down after an early stop
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "video-converter", version, about = "Batch conversion of catalog videos")]
struct Args {
    /// Path to the environment file
    #[arg(short = 'c', long = "config", default_value = "./.env")]
    config: PathBuf,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .map_err(|e| anyhow!("Failed to load configuration from {}: {}", args.config.display(), e))?;

    let available = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    config
        .check_thread_limit(available)
        .map_err(|e| anyhow!("Invalid thread configuration: {}", e))?;

    std::fs::create_dir_all(&config.log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {}: {}", config.log_dir.display(), e))?;

    let debug = config.env == RunEnv::Debug;
    init_run_logging(
        "video-converter",
        &config.log_dir,
        debug,
        if debug { "debug" } else { "info" },
    )
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        env = ?config.env,
        threads = config.thread_max,
        timeout_secs = config.timeout.as_secs(),
        "Starting Video Converter"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.thread_max)
        .enable_all()
        .build()
        .map_err(|e| anyhow!("Failed to build runtime: {}", e))?;

    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(counters) if counters.is_degraded() => Ok(ExitCode::FAILURE),
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(error = %e, "Run aborted");
            Err(e)
        }
    }
}

/// One complete run, including removal of the temporary directory
async fn run(config: AppConfig) -> Result<RunCounters> {
    let started = Instant::now();
    let cancel = CancellationToken::new();

    let result = convert(&config, cancel).await;

    if let Err(e) = tokio::fs::remove_dir_all(&config.temp_dir).await {
        warn!(dir = %config.temp_dir.display(), error = %e, "Failed to remove temporary directory");
    }

    info!(duration_secs = started.elapsed().as_secs(), "Video Converter stopped");
    if let Ok(counters) = &result {
        println!("{}", counters);
    }
    result
}

async fn convert(config: &AppConfig, cancel: CancellationToken) -> Result<RunCounters> {
    tokio::fs::create_dir_all(&config.temp_dir).await.map_err(|e| {
        anyhow!("Failed to create temporary directory {}: {}", config.temp_dir.display(), e)
    })?;

    let catalog = PgCatalog::connect(&config.database)
        .await
        .map_err(|e| anyhow!("Failed to connect to catalog database: {}", e))?;

    let cloud = PlatformCloud::authorize(&config.cloud, RetryConfig::from(&config.retry))
        .await
        .map_err(|e| anyhow!("Failed to authorize with remote storage: {}", e))?;

    let encoder = FfmpegEncoder::new(&config.encoder, cancel.clone());
    let version = encoder
        .probe()
        .await
        .map_err(|e| anyhow!("Transcoder is not available: {}", e))?;
    info!(ffmpeg = %version, "Transcoder ready");

    let candidates = catalog
        .list_videos()
        .await
        .map_err(|e| anyhow!("Failed to list videos: {}", e))?;
    info!(videos = candidates.len(), "Catalog loaded");

    let (reporter, aggregator) = progress::channel();
    let services = Services {
        catalog: Arc::new(catalog),
        transcoder: Arc::new(encoder),
        store: Arc::new(cloud),
        progress: reporter,
    };
    let scheduler = RunScheduler::new(
        services,
        SchedulerSettings {
            temp_dir: config.temp_dir.clone(),
            remove_original: config.remove_original,
            storage_prefix: config.cloud.original_prefix.clone(),
        },
    )
    .with_cancellation(cancel.clone());

    let deadline = Instant::now() + config.timeout;
    let mode = ScheduleMode::from_skip_partial(config.skip_not_full);
    let scheduling = tokio::spawn(async move {
        scheduler.run(candidates, deadline, mode).await;
    });

    let hard_deadline = deadline + config.deadline_grace;
    let report = aggregator
        .run(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(hard_deadline) => StopReason::DeadlineExpired,
                _ = shutdown::shutdown_signal() => StopReason::Aborted,
            }
        })
        .await;

    if report.reason == StopReason::Completed {
        if let Err(e) = scheduling.await {
            error!(error = %e, "Scheduler task failed");
        }
    } else {
        warn!(reason = ?report.reason, "Cancelling in-flight conversions");
        cancel.cancel();
        tokio::select! {
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!("Shutdown timeout reached, abandoning in-flight work");
            }
            _ = scheduling => {
                info!("In-flight work wound down");
            }
        }
    }

    let counters = report.counters;
    let summary = serde_json::to_string(&counters).unwrap_or_default();
    if counters.is_degraded() {
        error!(summary = %summary, reason = ?report.reason, "Run finished with failures");
    } else {
        info!(summary = %summary, reason = ?report.reason, "Run finished");
    }

    Ok(counters)
}
