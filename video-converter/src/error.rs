//! Error types for the converter's external collaborators
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


use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the catalog database
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Quality properties missing from catalog: {0}")]
    MissingQualityProperties(String),
}

/// Errors from the transcoder
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to run ffmpeg: {0}")]
    Spawn(#[from] io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Transcoding cancelled")]
    Cancelled,

    #[error("ffmpeg reported success but {0} was not created")]
    MissingOutput(PathBuf),

    #[error("Source path has no usable file name: {0}")]
    InvalidSource(PathBuf),
}

/// Errors locating an original from its catalog link
#[derive(Error, Debug)]
pub enum SourceUrlError {
    #[error("Link is not valid percent-encoded UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("Link is not a valid URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("Link has no file name")]
    NoFileName,
}

/// Errors from the remote store
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request to {url} failed with status: {status}")]
    Status { status: StatusCode, url: String },

    #[error("Transfer incomplete: expected {expected} bytes, received {received}")]
    ShortTransfer { expected: u64, received: u64 },

    #[error("Remote storage has no free space left")]
    InsufficientStorage,

    #[error("Local file error: {0}")]
    Io(#[from] io::Error),

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl CloudError {
    /// Whether the failure is transient and the transfer may be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            CloudError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || (status.is_server_error() && *status != StatusCode::INSUFFICIENT_STORAGE)
            }
            CloudError::ShortTransfer { .. } => true,
            CloudError::InsufficientStorage
            | CloudError::Io(_)
            | CloudError::Auth(_)
            | CloudError::InvalidResponse(_)
            | CloudError::Url(_) => false,
        }
    }
}
