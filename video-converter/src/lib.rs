//! Video Converter Library
//!
//! This library provides the batch conversion engine:
//! - Run scheduling under a deadline
//! - Per-video fan-out of derivative workers
//! - Progress aggregation over all workers
//! - Catalog, transcoder and remote storage clients
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


pub mod catalog;
pub mod cloud;
pub mod derivative;
pub mod error;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod transcoder;
pub mod worker;

pub use catalog::{CatalogSource, PgCatalog, QualityMapCache};
pub use cloud::{PlatformCloud, RemoteStore};
pub use error::{CatalogError, CloudError, EncodeError, SourceUrlError};
pub use progress::{ProgressAggregator, ProgressReporter, RunReport, StopReason};
pub use scheduler::{RunScheduler, ScheduleMode, SchedulerSettings};
pub use transcoder::{FfmpegEncoder, Transcoder};
pub use worker::{Services, VideoWorker};
