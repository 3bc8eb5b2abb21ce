//! Structured logging setup for the video converter
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


use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for one run
///
/// This sets up:
/// - JSON formatted logs written to a new file in `log_dir`
/// - Human-readable console logs when `console` is set
/// - Environment-based log level filtering
///
/// Returns the path of the log file.
pub fn init_run_logging(
    service_name: &str,
    log_dir: &Path,
    console: bool,
    default_level: &str,
) -> io::Result<PathBuf> {
    let (file, path) = create_log_file(service_name, log_dir, Utc::now())?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(console_layer)
        .init();

    tracing::info!(
        service = service_name,
        log_file = %path.display(),
        "Logging initialized"
    );

    Ok(path)
}

/// Name of the log file for a run started at `started`
pub fn log_file_name(service_name: &str, started: DateTime<Utc>) -> String {
    format!("{}-{}.log", service_name, started.format("%Y-%m-%d-%H-%M-%S"))
}

fn create_log_file(
    service_name: &str,
    log_dir: &Path,
    started: DateTime<Utc>,
) -> io::Result<(File, PathBuf)> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(service_name, started));
    let file = File::create(&path)?;
    Ok((file, path))
}
