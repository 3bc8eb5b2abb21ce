//! In-memory collaborators for exercising a run without external services

#![allow(dead_code)]

use async_trait::async_trait;
use converter_types::{Quality, QualityPropertyMap, Slot, VideoRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use video_converter::catalog::CatalogSource;
use video_converter::cloud::RemoteStore;
use video_converter::progress::{self, ProgressReporter, RunReport, StopReason};
use video_converter::transcoder::{output_path, Transcoder};
use video_converter::{
    CatalogError, CloudError, EncodeError, QualityMapCache, RunScheduler, ScheduleMode, SchedulerSettings, Services,
};

pub const STORAGE_PREFIX: &str = "/synergy/";
pub const PUBLIC_BASE: &str = "https://cdn.test/videoconverter/";
pub const CACHE_BASE: &str = "https://cache.test/";

/// Property IDs handed out for the five kinds
pub fn property_map() -> QualityPropertyMap {
    QualityPropertyMap::new(101, 102, 103, 104, 105)
}

#[derive(Default)]
pub struct FakeCatalog {
    pub fail_writes: AtomicBool,
    pub updates: Mutex<Vec<(i64, String)>>,
    pub inserts: Mutex<Vec<(i64, i64, String)>>,
    /// Fetches of the quality map that reached the catalog
    pub map_calls: AtomicUsize,
    quality_map: QualityMapCache,
}

impl FakeCatalog {
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<(i64, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn inserts(&self) -> Vec<(i64, i64, String)> {
        self.inserts.lock().unwrap().clone()
    }

    fn write_result(&self) -> Result<(), CatalogError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CatalogError::MissingQualityProperties("catalog is read-only".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn list_videos(&self) -> Result<Vec<VideoRecord>, CatalogError> {
        Ok(Vec::new())
    }

    async fn update_property(&self, property_id: i64, value: &str) -> Result<(), CatalogError> {
        self.write_result()?;
        self.updates.lock().unwrap().push((property_id, value.to_string()));
        Ok(())
    }

    async fn insert_property(
        &self,
        video_id: i64,
        property_id: i64,
        value: &str,
    ) -> Result<(), CatalogError> {
        self.write_result()?;
        self.inserts
            .lock()
            .unwrap()
            .push((video_id, property_id, value.to_string()));
        Ok(())
    }

    async fn quality_property_map(&self) -> Result<QualityPropertyMap, CatalogError> {
        self.quality_map
            .get_or_fetch(|| async {
                self.map_calls.fetch_add(1, Ordering::SeqCst);
                Ok(property_map())
            })
            .await
    }
}

#[derive(Default)]
pub struct FakeTranscoder {
    pub failing: HashSet<Quality>,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<Quality>>,
}

impl FakeTranscoder {
    pub fn failing(qualities: &[Quality]) -> Self {
        Self {
            failing: qualities.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Quality> {
        self.calls.lock().unwrap().clone()
    }

    async fn produce(
        &self,
        temp_dir: &Path,
        source: &Path,
        quality: Quality,
    ) -> Result<PathBuf, EncodeError> {
        self.calls.lock().unwrap().push(quality);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        assert!(source.exists(), "original must be present while transcoding");

        if self.failing.contains(&quality) {
            return Err(EncodeError::Failed {
                status: "exit status: 1".into(),
                stderr: "Invalid data found when processing input".into(),
            });
        }

        let output = output_path(temp_dir, source, quality)?;
        tokio::fs::write(&output, quality.tag()).await?;
        Ok(output)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn convert(
        &self,
        temp_dir: &Path,
        source: &Path,
        quality: Quality,
    ) -> Result<PathBuf, EncodeError> {
        self.produce(temp_dir, source, quality).await
    }

    async fn make_preview(&self, temp_dir: &Path, source: &Path) -> Result<PathBuf, EncodeError> {
        self.produce(temp_dir, source, Quality::Preview).await
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub fail_download: bool,
    pub fail_upload: bool,
    pub fail_delete: bool,
    /// Every upload finds the object already present, not only re-uploads
    pub existing: bool,
    pub download_delay: Option<Duration>,
    pub downloads: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        let mut uploads = self.uploads.lock().unwrap().clone();
        uploads.sort();
        uploads
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, CloudError> {
        self.downloads.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_download {
            return Err(CloudError::ShortTransfer {
                expected: 1024,
                received: 0,
            });
        }

        let body = b"original video";
        tokio::fs::write(destination, body).await?;
        Ok(body.len() as u64)
    }

    async fn upload(&self, remote_path: &str, local_file: &Path) -> Result<String, CloudError> {
        assert!(local_file.exists(), "derivative must exist when uploaded");
        if self.fail_upload {
            return Err(CloudError::InsufficientStorage);
        }

        let mut uploads = self.uploads.lock().unwrap();
        let present = self.existing || uploads.iter().any(|path| path == remote_path);
        uploads.push(remote_path.to_string());

        if present {
            Ok(format!("{}{}", CACHE_BASE, remote_path))
        } else {
            Ok(format!("{}{}", PUBLIC_BASE, remote_path))
        }
    }

    async fn delete(&self, remote_path: &str) -> Result<(), CloudError> {
        if self.fail_delete {
            return Err(CloudError::InsufficientStorage);
        }
        self.deletes.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }
}

/// A video whose original lives at `https://origin.test/synergy/{path}`
pub fn video(id: i64, path: &str) -> VideoRecord {
    VideoRecord::new(
        id,
        Slot::new(Some(id * 1000), Some(format!("https://origin.test/synergy/{}", path))),
    )
}

/// `record` with every kind populated except `missing`, whose property rows exist but are empty
pub fn populated_except(record: VideoRecord, missing: &[Quality]) -> VideoRecord {
    let id = record.id;
    Quality::ALL
        .into_iter()
        .enumerate()
        .fold(record, |record, (index, quality)| {
            let property_id = Some(id * 1000 + index as i64 + 1);
            let url = if missing.contains(&quality) {
                None
            } else {
                Some(format!("{}existing-{}.mp4", PUBLIC_BASE, quality.tag()))
            };
            record.with_derivative(quality, Slot::new(property_id, url))
        })
}

pub fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

/// Fakes plus a scratch directory for one run
pub struct Harness {
    pub catalog: Arc<FakeCatalog>,
    pub transcoder: Arc<FakeTranscoder>,
    pub store: Arc<FakeStore>,
    pub remove_original: bool,
    pub cancel: CancellationToken,
    pub temp: TempDir,
}

impl Harness {
    pub fn new(catalog: FakeCatalog, transcoder: FakeTranscoder, store: FakeStore) -> Self {
        Self {
            catalog: Arc::new(catalog),
            transcoder: Arc::new(transcoder),
            store: Arc::new(store),
            remove_original: false,
            cancel: CancellationToken::new(),
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(FakeCatalog::default(), FakeTranscoder::default(), FakeStore::default())
    }

    pub fn removing_originals(mut self) -> Self {
        self.remove_original = true;
        self
    }

    pub fn work_root(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn scheduler(&self, reporter: ProgressReporter) -> RunScheduler {
        let services = Services {
            catalog: self.catalog.clone(),
            transcoder: self.transcoder.clone(),
            store: self.store.clone(),
            progress: reporter,
        };
        RunScheduler::new(
            services,
            SchedulerSettings {
                temp_dir: self.work_root(),
                remove_original: self.remove_original,
                storage_prefix: STORAGE_PREFIX.to_string(),
            },
        )
        .with_cancellation(self.cancel.clone())
    }

    /// Schedule `videos` and aggregate until the run completes
    pub async fn run(
        &self,
        videos: Vec<VideoRecord>,
        deadline: Instant,
        mode: ScheduleMode,
    ) -> (Vec<VideoRecord>, RunReport) {
        let (reporter, aggregator) = progress::channel();
        let scheduler = self.scheduler(reporter);

        let (mut records, report) = tokio::join!(
            scheduler.run(videos, deadline, mode),
            aggregator.run(std::future::pending::<StopReason>()),
        );
        records.sort_by_key(|record| record.id);
        (records, report)
    }
}
