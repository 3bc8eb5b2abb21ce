//! Configuration management for the video converter
//!
//! Settings come from a `.env` file loaded into the process environment and
//! are then read from the environment.
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


use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://filespot.platformcraft.ru/2/fs/container";
const DEFAULT_AUTH_URL: &str = "https://auth.platformcraft.ru/token";
const DEFAULT_CACHE_URL: &str = "https://cache-synergy.cdnvideo.ru/synergy/";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    /// Console logging at debug level in addition to the log file
    Debug,
    Prod,
}

impl RunEnv {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("debug") => RunEnv::Debug,
            _ => RunEnv::Prod,
        }
    }
}

/// Catalog database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    /// Code of the catalog block that holds the videos
    pub iblock_code: String,
    pub iblock_type: String,
}

/// Remote storage configuration
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub login: String,
    pub password: String,
    pub api_url: String,
    pub auth_url: String,
    /// Base of the deterministic URL returned for already-present objects
    pub cache_url: String,
    pub upload_folder: String,
    /// URL path prefix removed to get an original's remote directory
    pub original_prefix: String,
}

/// Transcoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    /// `-threads` for each ffmpeg process, 0 lets ffmpeg decide
    pub threads: usize,
    pub preview_duration: Duration,
}

/// Retry policy for remote transfers
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: RunEnv,
    pub log_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Time after which no new video is started
    pub timeout: Duration,
    /// Extra time after `timeout` before the run is reported as expired
    pub deadline_grace: Duration,
    pub thread_max: usize,
    pub remove_original: bool,
    pub skip_not_full: bool,
    pub encoder: EncoderConfig,
    pub cloud: CloudConfig,
    pub database: DatabaseConfig,
    pub retry: RetrySettings,
}

/// Flat view of the environment, one field per variable (lowercased)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    env: Option<String>,
    log_dir: Option<String>,
    tmp_dir: Option<String>,
    timeout: Option<u64>,
    deadline_grace_minutes: Option<u64>,
    thread_max: Option<usize>,
    thread_ffmpeg_max: Option<usize>,
    ffmpeg_path: Option<String>,
    preview_seconds: Option<u64>,
    rm_original: Option<bool>,
    skip_not_full: Option<bool>,
    cloud_login: Option<String>,
    cloud_password: Option<String>,
    cloud_api_url: Option<String>,
    cloud_auth_url: Option<String>,
    cloud_cache_url: Option<String>,
    cloud_upload_folder: Option<String>,
    cloud_original_prefix: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_name: Option<String>,
    db_username: Option<String>,
    db_password: Option<String>,
    catalog_iblock_code: Option<String>,
    catalog_iblock_type: Option<String>,
    upload_max_retries: Option<u32>,
    upload_retry_initial_delay: Option<u64>,
    upload_retry_max_delay: Option<u64>,
    upload_retry_multiplier: Option<f64>,
}

impl AppConfig {
    /// Load a `.env` file into the environment, then read the configuration
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::from_path(path).map_err(|e| {
            ConfigError::Message(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let source = Config::builder()
            .add_source(Environment::default())
            .build()?;

        Self::from_config(source)
    }

    /// Build the configuration from an already assembled source
    pub fn from_config(source: Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = source.try_deserialize()?;

        let timeout_hours = raw
            .timeout
            .filter(|hours| *hours > 0)
            .ok_or_else(|| ConfigError::NotFound("TIMEOUT".into()))?;
        let thread_max = raw
            .thread_max
            .filter(|threads| *threads > 0)
            .ok_or_else(|| ConfigError::NotFound("THREAD_MAX".into()))?;

        Ok(Self {
            env: RunEnv::parse(raw.env.as_deref()),
            log_dir: required(raw.log_dir, "LOG_DIR")?.into(),
            temp_dir: required(raw.tmp_dir, "TMP_DIR")?.into(),
            timeout: Duration::from_secs(timeout_hours * 3600),
            deadline_grace: Duration::from_secs(raw.deadline_grace_minutes.unwrap_or(60) * 60),
            thread_max,
            remove_original: raw.rm_original.unwrap_or(false),
            skip_not_full: raw.skip_not_full.unwrap_or(false),
            encoder: EncoderConfig {
                ffmpeg_path: non_empty(raw.ffmpeg_path)
                    .unwrap_or_else(|| "ffmpeg".to_string())
                    .into(),
                threads: raw.thread_ffmpeg_max.unwrap_or(0),
                preview_duration: Duration::from_secs(raw.preview_seconds.unwrap_or(180)),
            },
            cloud: CloudConfig {
                login: required(raw.cloud_login, "CLOUD_LOGIN")?,
                password: required(raw.cloud_password, "CLOUD_PASSWORD")?,
                api_url: or_default(raw.cloud_api_url, DEFAULT_API_URL),
                auth_url: or_default(raw.cloud_auth_url, DEFAULT_AUTH_URL),
                cache_url: or_default(raw.cloud_cache_url, DEFAULT_CACHE_URL),
                upload_folder: or_default(raw.cloud_upload_folder, "videoconverter"),
                original_prefix: or_default(raw.cloud_original_prefix, "/synergy/"),
            },
            database: DatabaseConfig {
                host: or_default(raw.db_host, "localhost"),
                port: raw.db_port.unwrap_or(5432),
                name: required(raw.db_name, "DB_NAME")?,
                username: required(raw.db_username, "DB_USERNAME")?,
                password: required(raw.db_password, "DB_PASSWORD")?,
                iblock_code: or_default(raw.catalog_iblock_code, "lessons"),
                iblock_type: or_default(raw.catalog_iblock_type, "content"),
            },
            retry: RetrySettings {
                max_retries: raw.upload_max_retries.unwrap_or(3),
                initial_delay_secs: raw.upload_retry_initial_delay.unwrap_or(1),
                max_delay_secs: raw.upload_retry_max_delay.unwrap_or(60),
                multiplier: raw.upload_retry_multiplier.unwrap_or(2.0),
            },
        })
    }

    /// Reject a worker thread count above the CPUs available to the process
    pub fn check_thread_limit(&self, available: usize) -> Result<(), ConfigError> {
        if self.thread_max > available {
            return Err(ConfigError::Message(format!(
                "THREAD_MAX is {} but only {} CPUs are available",
                self.thread_max, available
            )));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, key: &str) -> Result<String, ConfigError> {
    non_empty(value).ok_or_else(|| ConfigError::NotFound(key.to_string()))
}

fn or_default(value: Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or_else(|| default.to_string())
}
