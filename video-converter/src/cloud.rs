//! Remote Store
//!
//! Transfers originals and derivatives to and from the remote storage
//! provider over its HTTP API.
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


use crate::error::CloudError;
use crate::retry::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use converter_config::CloudConfig;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

/// File transfer used by the converter
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch `url` into `destination`, returning the byte count
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, CloudError>;

    /// Store `local_file` at `remote_path`, returning its public URL.
    ///
    /// An object already present at `remote_path` is not an error; its
    /// deterministic cache URL is returned instead.
    async fn upload(&self, remote_path: &str, local_file: &Path) -> Result<String, CloudError>;

    async fn delete(&self, remote_path: &str) -> Result<(), CloudError>;
}

#[derive(Debug, Deserialize)]
struct AuthData {
    access_token: String,
    owner_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    download_url: String,
}

/// Client for the Platformcraft file storage API
pub struct PlatformCloud {
    client: Client,
    api_url: String,
    cache_url: String,
    upload_folder: String,
    token: String,
    owner_id: String,
    retry: RetryConfig,
}

impl PlatformCloud {
    /// Obtain an access token and build a client with it
    pub async fn authorize(config: &CloudConfig, retry: RetryConfig) -> Result<Self, CloudError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60 * 60))
            .build()?;

        let response = client
            .post(&config.auth_url)
            .query(&[("login", &config.login), ("password", &config.password)])
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Auth(format!("token endpoint returned {}", status)));
        }

        let auth: AuthData = response
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("invalid token response: {}", e)))?;

        info!(owner_id = %auth.owner_id, "Remote storage authorized");

        Ok(Self::new(client, config, auth.access_token, auth.owner_id, retry))
    }

    /// Create a client from an existing token
    pub fn new(
        client: Client,
        config: &CloudConfig,
        token: String,
        owner_id: String,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            cache_url: config.cache_url.clone(),
            upload_folder: config.upload_folder.clone(),
            token,
            owner_id,
            retry,
        }
    }

    /// `{api_url}/{owner_id}/object/{prefix...}/{remote_path}`, segments escaped
    fn object_url(&self, prefix: &[&str], remote_path: &str) -> Result<Url, CloudError> {
        let mut endpoint = Url::parse(&self.api_url)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| CloudError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(&self.owner_id)
            .push("object")
            .extend(prefix)
            .extend(remote_path.split('/').filter(|segment| !segment.is_empty()));
        Ok(endpoint)
    }

    async fn download_once(&self, url: &str, destination: &Path) -> Result<u64, CloudError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status,
                url: url.to_string(),
            });
        }

        let expected = response.content_length();
        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = expected {
            if received < expected {
                return Err(CloudError::ShortTransfer { expected, received });
            }
        }

        Ok(received)
    }

    async fn upload_once(&self, remote_path: &str, local_file: &Path) -> Result<String, CloudError> {
        let url = self.object_url(&[self.upload_folder.as_str()], remote_path)?;

        let file = File::open(local_file).await?;
        let length = file.metadata().await?.len();
        let file_name = local_file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(file_name);

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => {
                debug!(remote_path = remote_path, "Object already present in remote storage");
                Ok(format!("{}{}", self.cache_url, remote_path))
            }
            StatusCode::INSUFFICIENT_STORAGE => Err(CloudError::InsufficientStorage),
            status if status.is_success() => {
                let body: UploadResponse = response
                    .json()
                    .await
                    .map_err(|e| CloudError::InvalidResponse(e.to_string()))?;
                Ok(body.download_url)
            }
            status => Err(CloudError::Status {
                status,
                url: url.to_string(),
            }),
        }
    }

    async fn delete_once(&self, remote_path: &str) -> Result<(), CloudError> {
        let url = self.object_url(&[], remote_path)?;

        let response = self
            .client
            .delete(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PlatformCloud {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, CloudError> {
        info!(url = url, destination = %destination.display(), "Downloading original");

        let size = retry_with_backoff(&self.retry, CloudError::is_retryable, || {
            self.download_once(url, destination)
        })
        .await?;

        info!(url = url, size = size, "Original downloaded");
        Ok(size)
    }

    async fn upload(&self, remote_path: &str, local_file: &Path) -> Result<String, CloudError> {
        let public_url = retry_with_backoff(&self.retry, CloudError::is_retryable, || {
            self.upload_once(remote_path, local_file)
        })
        .await?;

        info!(remote_path = remote_path, url = %public_url, "File uploaded");
        Ok(public_url)
    }

    async fn delete(&self, remote_path: &str) -> Result<(), CloudError> {
        retry_with_backoff(&self.retry, CloudError::is_retryable, || {
            self.delete_once(remote_path)
        })
        .await?;

        info!(remote_path = remote_path, "Remote object deleted");
        Ok(())
    }
}
