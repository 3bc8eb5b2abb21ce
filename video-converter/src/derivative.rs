//! Derivative Worker
//!
//! Produces one quality derivative of one video: transcode, upload, and
//! record the resulting link in the catalog.
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


use crate::error::CatalogError;
use crate::worker::Services;
use converter_types::{CountEvent, Quality};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use url::Url;

/// Everything a derivative worker needs to know about its video
#[derive(Debug, Clone)]
pub struct DerivativeJob {
    pub video_id: i64,
    pub quality: Quality,
    /// Existing catalog property row for this quality, if any
    pub property_id: Option<i64>,
    /// Local copy of the original
    pub source: PathBuf,
    /// Directory for the derivative file
    pub work_dir: PathBuf,
    /// Remote directory of the original, with trailing slash
    pub remote_dir: String,
}

/// How a derivative worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivativeOutcome {
    ConvertFailed,
    UploadFailed,
    /// Uploaded, but the link could not be recorded
    NotPersisted,
    /// Uploaded and recorded under this URL
    Persisted(String),
}

/// Processes a single quality kind for a single video
#[derive(Clone)]
pub struct DerivativeWorker {
    services: Services,
}

impl DerivativeWorker {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn produce(&self, job: DerivativeJob) -> DerivativeOutcome {
        let transcoded = match job.quality {
            Quality::Preview => {
                self.services
                    .transcoder
                    .make_preview(&job.work_dir, &job.source)
                    .await
            }
            quality => {
                self.services
                    .transcoder
                    .convert(&job.work_dir, &job.source, quality)
                    .await
            }
        };

        let output = match transcoded {
            Ok(output) => output,
            Err(e) => {
                error!(
                    video_id = job.video_id,
                    quality = %job.quality,
                    error = %e,
                    "Failed to transcode derivative"
                );
                self.services.progress.report(CountEvent::ConvertFailed);
                return DerivativeOutcome::ConvertFailed;
            }
        };
        self.services.progress.report(CountEvent::Converted);

        let remote_path = format!("{}{}", job.remote_dir, file_name(&output));
        let uploaded = self.services.store.upload(&remote_path, &output).await;
        remove_local(&output).await;

        let public_url = match uploaded {
            Ok(url) => url,
            Err(e) => {
                error!(
                    video_id = job.video_id,
                    quality = %job.quality,
                    remote_path = %remote_path,
                    error = %e,
                    "Failed to upload derivative"
                );
                self.services.progress.report(CountEvent::UploadFailed);
                return DerivativeOutcome::UploadFailed;
            }
        };
        self.services.progress.report(CountEvent::Uploaded);

        let link = match Url::parse(&public_url) {
            Ok(url) => url.to_string(),
            Err(e) => {
                error!(
                    video_id = job.video_id,
                    quality = %job.quality,
                    url = %public_url,
                    error = %e,
                    "Remote store returned an invalid URL"
                );
                return DerivativeOutcome::NotPersisted;
            }
        };

        match self.persist(&job, &link).await {
            Ok(()) => {
                info!(
                    video_id = job.video_id,
                    quality = %job.quality,
                    url = %link,
                    "Derivative link recorded"
                );
                DerivativeOutcome::Persisted(link)
            }
            Err(e) => {
                error!(
                    video_id = job.video_id,
                    quality = %job.quality,
                    url = %link,
                    error = %e,
                    "Failed to record derivative link"
                );
                DerivativeOutcome::NotPersisted
            }
        }
    }

    async fn persist(&self, job: &DerivativeJob, link: &str) -> Result<(), CatalogError> {
        let catalog = &self.services.catalog;
        match job.property_id {
            Some(property_id) => catalog.update_property(property_id, link).await,
            None => {
                let map = catalog.quality_property_map().await?;
                catalog
                    .insert_property(job.video_id, map.property_id(job.quality), link)
                    .await
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(file = %path.display(), error = %e, "Failed to remove local derivative");
    }
}
