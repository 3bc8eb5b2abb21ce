//! Video Worker
//!
//! Owns one video for the duration of its processing: fans out derivative
//! workers for the missing qualities, waits for them, and cleans up.
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


use crate::catalog::CatalogSource;
use crate::cloud::RemoteStore;
use crate::derivative::{DerivativeJob, DerivativeOutcome, DerivativeWorker};
use crate::progress::ProgressReporter;
use crate::transcoder::Transcoder;
use converter_types::VideoRecord;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Collaborators shared by every worker of a run
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn CatalogSource>,
    pub transcoder: Arc<dyn Transcoder>,
    pub store: Arc<dyn RemoteStore>,
    pub progress: ProgressReporter,
}

/// Where a video's original lives, locally and remotely
#[derive(Debug, Clone)]
pub struct LocalOriginal {
    /// Per-video directory holding the original and its derivatives
    pub work_dir: PathBuf,
    pub local_path: PathBuf,
    /// Remote directory, with trailing slash unless empty
    pub remote_dir: String,
    /// File name of the original as stored remotely
    pub remote_file: String,
}

/// A record whose original has been downloaded
#[derive(Debug, Clone)]
pub struct PreparedVideo {
    pub record: VideoRecord,
    pub source: LocalOriginal,
}

/// Runs the lifecycle of a single video
#[derive(Clone)]
pub struct VideoWorker {
    services: Services,
    remove_original: bool,
}

impl VideoWorker {
    pub fn new(services: Services, remove_original: bool) -> Self {
        Self {
            services,
            remove_original,
        }
    }

    /// Produce every missing derivative, then clean up. Returns the updated record.
    pub async fn process(&self, video: PreparedVideo) -> VideoRecord {
        let PreparedVideo { mut record, source } = video;
        let missing = record.missing_qualities();

        info!(
            video_id = record.id,
            missing = ?missing,
            "Processing video"
        );

        let mut derivatives = JoinSet::new();
        for quality in missing {
            let worker = DerivativeWorker::new(self.services.clone());
            let job = DerivativeJob {
                video_id: record.id,
                quality,
                property_id: record.slot(quality).property_id,
                source: source.local_path.clone(),
                work_dir: source.work_dir.clone(),
                remote_dir: source.remote_dir.clone(),
            };
            derivatives.spawn(async move { (quality, worker.produce(job).await) });
        }

        while let Some(joined) = derivatives.join_next().await {
            match joined {
                Ok((quality, DerivativeOutcome::Persisted(url))) => {
                    record.slot_mut(quality).url = Some(url);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(video_id = record.id, error = %e, "Derivative task failed");
                }
            }
        }

        remove_work_files(&source).await;

        if record.is_complete() && self.remove_original {
            self.retire_original(&mut record, &source).await;
        }

        info!(
            video_id = record.id,
            complete = record.is_complete(),
            "Video processed"
        );
        record
    }

    /// Delete the remote original and clear its catalog link
    async fn retire_original(&self, record: &mut VideoRecord, source: &LocalOriginal) {
        let remote_path = format!("{}{}", source.remote_dir, source.remote_file);

        if let Err(e) = self.services.store.delete(&remote_path).await {
            error!(
                video_id = record.id,
                remote_path = %remote_path,
                error = %e,
                "Failed to delete remote original"
            );
            return;
        }

        let Some(property_id) = record.original.property_id else {
            warn!(video_id = record.id, "Original has no property row, link left as is");
            return;
        };

        match self.services.catalog.update_property(property_id, "").await {
            Ok(()) => {
                record.original.url = None;
                info!(video_id = record.id, remote_path = %remote_path, "Original retired");
            }
            Err(e) => {
                error!(
                    video_id = record.id,
                    property_id = property_id,
                    error = %e,
                    "Failed to clear original link"
                );
            }
        }
    }
}

/// Remove the local original and its now-empty work directory
async fn remove_work_files(source: &LocalOriginal) {
    if let Err(e) = tokio::fs::remove_file(&source.local_path).await {
        warn!(
            file = %source.local_path.display(),
            error = %e,
            "Failed to remove local original"
        );
    }

    if let Err(e) = tokio::fs::remove_dir(&source.work_dir).await {
        warn!(
            dir = %source.work_dir.display(),
            error = %e,
            "Failed to remove work directory"
        );
    }
}
