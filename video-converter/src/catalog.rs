//! Catalog Source
//!
//! Reads candidate videos from the content catalog and persists derivative
//! links back into it.
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
use async_trait::async_trait;
use converter_config::DatabaseConfig;
use converter_types::{Quality, QualityPropertyMap, Slot, VideoRecord};
use std::future::Future;
use tokio::sync::{Mutex, OnceCell};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

/// Catalog access used by the converter
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every video record eligible for consideration, in catalog order
    async fn list_videos(&self) -> Result<Vec<VideoRecord>, CatalogError>;

    /// Overwrite the value of an existing property row
    async fn update_property(&self, property_id: i64, value: &str) -> Result<(), CatalogError>;

    /// Add a property row of kind `property_id` to video `video_id`
    async fn insert_property(
        &self,
        video_id: i64,
        property_id: i64,
        value: &str,
    ) -> Result<(), CatalogError>;

    /// Property IDs of the five quality kinds
    async fn quality_property_map(&self) -> Result<QualityPropertyMap, CatalogError>;
}

/// Quality property map kept after its first successful fetch.
///
/// Concurrent callers share one fetch; a failed fetch is tried again by the
/// next caller.
#[derive(Debug, Default)]
pub struct QualityMapCache {
    map: OnceCell<QualityPropertyMap>,
}

impl QualityMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<QualityPropertyMap, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QualityPropertyMap, CatalogError>>,
    {
        self.map
            .get_or_try_init(|| async {
                let map = fetch().await?;
                info!(?map, "Quality property IDs loaded");
                Ok::<_, CatalogError>(map)
            })
            .await
            .copied()
    }
}

/// Catalog backed by a Bitrix-style information block schema in PostgreSQL
pub struct PgCatalog {
    client: Client,
    iblock_code: String,
    iblock_type: String,
    quality_map: QualityMapCache,
    insert_lock: Mutex<()>,
}

impl PgCatalog {
    /// Connect to the catalog database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CatalogError> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Connecting to catalog database"
        );

        let (client, connection) = tokio_postgres::Config::new()
            .host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.username)
            .password(&config.password)
            .connect(NoTls)
            .await?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Catalog database connection error");
            }
        });

        info!("Catalog database connected");

        Ok(Self {
            client,
            iblock_code: config.iblock_code.clone(),
            iblock_type: config.iblock_type.clone(),
            quality_map: QualityMapCache::new(),
            insert_lock: Mutex::new(()),
        })
    }

    async fn fetch_quality_map(&self) -> Result<QualityPropertyMap, CatalogError> {
        let codes: Vec<&str> = Quality::ALL.iter().map(|q| q.property_code()).collect();
        let rows = self
            .client
            .query(
                r#"
                SELECT bip.code, bip.id
                FROM b_iblock_property bip
                JOIN b_iblock bi ON bi.id = bip.iblock_id
                WHERE bi.code = $1 AND bi.iblock_type_id = $2
                  AND bip.code = ANY($3)
                "#,
                &[&self.iblock_code, &self.iblock_type, &codes],
            )
            .await?;

        let mut ids = [None; 5];
        for row in rows {
            let code: String = row.try_get("code")?;
            let id: i64 = row.try_get("id")?;
            if let Some(index) = Quality::ALL.iter().position(|q| q.property_code() == code) {
                ids[index] = Some(id);
            }
        }

        match ids {
            [Some(p1080), Some(p720), Some(p480), Some(p360), Some(preview)] => {
                Ok(QualityPropertyMap::new(p1080, p720, p480, p360, preview))
            }
            _ => {
                let missing: Vec<&str> = Quality::ALL
                    .iter()
                    .zip(ids.iter())
                    .filter(|(_, id)| id.is_none())
                    .map(|(q, _)| q.property_code())
                    .collect();
                Err(CatalogError::MissingQualityProperties(missing.join(", ")))
            }
        }
    }
}

fn slot_from_row(row: &Row, id_column: &str, value_column: &str) -> Result<Slot, CatalogError> {
    Ok(Slot::new(row.try_get(id_column)?, row.try_get(value_column)?))
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn list_videos(&self) -> Result<Vec<VideoRecord>, CatalogError> {
        let rows = self
            .client
            .query(
                r#"
                SELECT p.iblock_element_id AS id,
                       p.id AS orig_id, p.value AS orig_link,
                       p1080.id AS p1080_id, p1080.value AS p1080_link,
                       p720.id AS p720_id, p720.value AS p720_link,
                       p480.id AS p480_id, p480.value AS p480_link,
                       p360.id AS p360_id, p360.value AS p360_link,
                       pp.id AS preview_id, pp.value AS preview_link
                FROM b_iblock bi
                JOIN b_iblock_property bip ON bip.iblock_id = bi.id AND bip.code = 'VIDEO_LINK'
                JOIN b_iblock_property bip1080 ON bip1080.iblock_id = bi.id AND bip1080.code = 'VIDEO_LINK_1080p'
                JOIN b_iblock_property bip720 ON bip720.iblock_id = bi.id AND bip720.code = 'VIDEO_LINK_720p'
                JOIN b_iblock_property bip480 ON bip480.iblock_id = bi.id AND bip480.code = 'VIDEO_LINK_480p'
                JOIN b_iblock_property bip360 ON bip360.iblock_id = bi.id AND bip360.code = 'VIDEO_LINK_360p'
                JOIN b_iblock_property bipp ON bipp.iblock_id = bi.id AND bipp.code = 'VIDEO_LINK_PREVIEW'
                LEFT JOIN b_iblock_element_property p ON p.iblock_property_id = bip.id
                LEFT JOIN b_iblock_element_property p1080
                    ON p1080.iblock_property_id = bip1080.id AND p1080.iblock_element_id = p.iblock_element_id
                LEFT JOIN b_iblock_element_property p720
                    ON p720.iblock_property_id = bip720.id AND p720.iblock_element_id = p.iblock_element_id
                LEFT JOIN b_iblock_element_property p480
                    ON p480.iblock_property_id = bip480.id AND p480.iblock_element_id = p.iblock_element_id
                LEFT JOIN b_iblock_element_property p360
                    ON p360.iblock_property_id = bip360.id AND p360.iblock_element_id = p.iblock_element_id
                LEFT JOIN b_iblock_element_property pp
                    ON pp.iblock_property_id = bipp.id AND pp.iblock_element_id = p.iblock_element_id
                WHERE bi.code = $1 AND bi.iblock_type_id = $2
                ORDER BY p.iblock_element_id
                "#,
                &[&self.iblock_code, &self.iblock_type],
            )
            .await?;

        let mut videos = Vec::with_capacity(rows.len());
        for row in &rows {
            // Blocks without any original yield a single all-NULL row
            let Some(id) = row.try_get::<_, Option<i64>>("id")? else {
                continue;
            };

            let video = VideoRecord::new(id, slot_from_row(row, "orig_id", "orig_link")?)
                .with_derivative(Quality::P1080, slot_from_row(row, "p1080_id", "p1080_link")?)
                .with_derivative(Quality::P720, slot_from_row(row, "p720_id", "p720_link")?)
                .with_derivative(Quality::P480, slot_from_row(row, "p480_id", "p480_link")?)
                .with_derivative(Quality::P360, slot_from_row(row, "p360_id", "p360_link")?)
                .with_derivative(Quality::Preview, slot_from_row(row, "preview_id", "preview_link")?);
            videos.push(video);
        }

        info!(count = videos.len(), "Videos fetched from catalog");
        Ok(videos)
    }

    async fn update_property(&self, property_id: i64, value: &str) -> Result<(), CatalogError> {
        self.client
            .execute(
                r#"
                UPDATE b_iblock_element_property
                SET value = $1
                WHERE id = $2
                "#,
                &[&value, &property_id],
            )
            .await?;

        debug!(property_id = property_id, "Catalog property updated");
        Ok(())
    }

    async fn insert_property(
        &self,
        video_id: i64,
        property_id: i64,
        value: &str,
    ) -> Result<(), CatalogError> {
        // Row IDs are allocated as MAX(id) + 1
        let _guard = self.insert_lock.lock().await;

        self.client
            .execute(
                r#"
                INSERT INTO b_iblock_element_property (id, iblock_property_id, iblock_element_id, value)
                SELECT COALESCE(MAX(id), 0) + 1, $1, $2, $3
                FROM b_iblock_element_property
                "#,
                &[&property_id, &video_id, &value],
            )
            .await?;

        debug!(
            video_id = video_id,
            property_id = property_id,
            "Catalog property inserted"
        );
        Ok(())
    }

    async fn quality_property_map(&self) -> Result<QualityPropertyMap, CatalogError> {
        self.quality_map
            .get_or_fetch(|| self.fetch_quality_map())
            .await
    }
}
