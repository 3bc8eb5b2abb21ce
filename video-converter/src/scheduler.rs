//! Run Scheduler
//!
//! Walks the candidate list under a deadline, downloads the original of
//! every eligible video and starts a video worker for it.
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


use crate::error::SourceUrlError;
use crate::worker::{LocalOriginal, PreparedVideo, Services, VideoWorker};
use converter_types::{sanitize_file_name, CountEvent, VideoRecord};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// How partially-populated videos are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Produce only the missing derivatives
    RetryMissing,
    /// Leave partially-populated videos alone
    SkipPartial,
}

impl ScheduleMode {
    pub fn from_skip_partial(skip: bool) -> Self {
        if skip {
            ScheduleMode::SkipPartial
        } else {
            ScheduleMode::RetryMissing
        }
    }
}

/// Whether a candidate gets a video worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Complete,
    Partial,
    NoOriginal,
}

pub fn eligibility(record: &VideoRecord, mode: ScheduleMode) -> Eligibility {
    if record.is_complete() {
        Eligibility::Complete
    } else if mode == ScheduleMode::SkipPartial && record.is_partially_populated() {
        Eligibility::Partial
    } else if !record.original.is_present() {
        Eligibility::NoOriginal
    } else {
        Eligibility::Eligible
    }
}

/// An original's link resolved into its download URL and remote location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalLocation {
    /// Normalized, percent-encoded URL
    pub url: String,
    pub remote_dir: String,
    pub remote_file: String,
    /// Local file name
    pub file_name: String,
}

/// Resolve a catalog link; `storage_prefix` is stripped from the URL path.
///
/// The link is parsed as stored and its path decoded exactly once, so
/// escaped `?`, `#` and `%` stay part of the file name.
pub fn locate_original(link: &str, storage_prefix: &str) -> Result<OriginalLocation, SourceUrlError> {
    urlencoding::decode(link)?;
    let url = Url::parse(link.trim())?;
    let path = urlencoding::decode(url.path())?;

    let (dir, file) = match path.rfind('/') {
        Some(slash) => path.split_at(slash + 1),
        None => ("", &*path),
    };
    if file.trim().is_empty() {
        return Err(SourceUrlError::NoFileName);
    }

    let remote_dir = dir
        .strip_prefix(storage_prefix)
        .unwrap_or_else(|| dir.trim_start_matches('/'));

    Ok(OriginalLocation {
        url: url.to_string(),
        remote_dir: remote_dir.to_string(),
        remote_file: file.to_string(),
        file_name: sanitize_file_name(file),
    })
}

/// Scheduler settings taken from the application configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub temp_dir: PathBuf,
    pub remove_original: bool,
    /// URL path prefix of originals in remote storage
    pub storage_prefix: String,
}

/// Starts video workers for eligible candidates
pub struct RunScheduler {
    services: Services,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl RunScheduler {
    pub fn new(services: Services, settings: SchedulerSettings) -> Self {
        Self {
            services,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing work, including a download in progress, once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Schedule every eligible candidate until `deadline`, then wait for all
    /// started workers. Returns the records of the processed videos.
    pub async fn run(
        &self,
        candidates: Vec<VideoRecord>,
        deadline: Instant,
        mode: ScheduleMode,
    ) -> Vec<VideoRecord> {
        let discovered = candidates.len() as u64;
        let mut videos = JoinSet::new();

        info!(candidates = discovered, ?mode, "Scheduling run");
        // Counted up front so a run stopped mid-loop still reports it
        self.services.progress.report(CountEvent::Discovered(discovered));

        for record in candidates {
            if Instant::now() > deadline {
                warn!(video_id = record.id, "Deadline passed, no further videos will be started");
                break;
            }
            if self.cancel.is_cancelled() {
                warn!(video_id = record.id, "Run cancelled, no further videos will be started");
                break;
            }

            let status = eligibility(&record, mode);
            if status != Eligibility::Eligible {
                debug!(video_id = record.id, reason = ?status, "Skipping video");
                continue;
            }

            let Some(video) = self.prepare(record).await else {
                continue;
            };

            let worker = VideoWorker::new(self.services.clone(), self.settings.remove_original);
            videos.spawn(async move { worker.process(video).await });
        }

        let mut processed = Vec::new();
        while let Some(joined) = videos.join_next().await {
            match joined {
                Ok(record) => processed.push(record),
                Err(e) => error!(error = %e, "Video task failed"),
            }
        }

        info!(processed = processed.len(), "All video workers finished");
        self.services.progress.report(CountEvent::RunComplete);

        processed
    }

    /// Resolve the original's location and download it
    async fn prepare(&self, mut record: VideoRecord) -> Option<PreparedVideo> {
        let link = record.original.link().unwrap_or_default();
        let location = match locate_original(link, &self.settings.storage_prefix) {
            Ok(location) => location,
            Err(e) => {
                error!(video_id = record.id, url = link, error = %e, "Malformed original link, skipping video");
                return None;
            }
        };

        let work_dir = self.settings.temp_dir.join(record.id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            error!(
                video_id = record.id,
                dir = %work_dir.display(),
                error = %e,
                "Failed to create work directory, skipping video"
            );
            return None;
        }

        let local_path = work_dir.join(&location.file_name);
        let downloaded = tokio::select! {
            result = self.services.store.download(&location.url, &local_path) => result,
            _ = self.cancel.cancelled() => {
                warn!(video_id = record.id, "Run cancelled during download, skipping video");
                discard_work_dir(&work_dir).await;
                return None;
            }
        };
        if let Err(e) = downloaded {
            error!(
                video_id = record.id,
                url = %location.url,
                error = %e,
                "Failed to download original, skipping video"
            );
            discard_work_dir(&work_dir).await;
            return None;
        }

        record.original.url = Some(location.url);

        Some(PreparedVideo {
            record,
            source: LocalOriginal {
                work_dir,
                local_path,
                remote_dir: location.remote_dir,
                remote_file: location.remote_file,
            },
        })
    }
}

async fn discard_work_dir(work_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
        warn!(dir = %work_dir.display(), error = %e, "Failed to remove work directory");
    }
}
