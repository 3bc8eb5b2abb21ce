//! Catalog records and quality kinds
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


use std::fmt;

/// Derivative kinds produced for every video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quality {
    P1080,
    P720,
    P480,
    P360,
    Preview,
}

impl Quality {
    /// Every kind, highest resolution first
    pub const ALL: [Quality; 5] = [
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
        Quality::Preview,
    ];

    /// Target frame height, `None` for the preview
    pub fn height(self) -> Option<u32> {
        match self {
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
            Quality::Preview => None,
        }
    }

    /// Short tag used in derivative file names
    pub fn tag(self) -> &'static str {
        match self {
            Quality::P1080 => "1080",
            Quality::P720 => "720",
            Quality::P480 => "480",
            Quality::P360 => "360",
            Quality::Preview => "preview",
        }
    }

    /// Catalog property code holding this kind's link
    pub fn property_code(self) -> &'static str {
        match self {
            Quality::P1080 => "VIDEO_LINK_1080p",
            Quality::P720 => "VIDEO_LINK_720p",
            Quality::P480 => "VIDEO_LINK_480p",
            Quality::P360 => "VIDEO_LINK_360p",
            Quality::Preview => "VIDEO_LINK_PREVIEW",
        }
    }

    fn index(self) -> usize {
        match self {
            Quality::P1080 => 0,
            Quality::P720 => 1,
            Quality::P480 => 2,
            Quality::P360 => 3,
            Quality::Preview => 4,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One catalog property: its row ID and the link it stores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    pub property_id: Option<i64>,
    pub url: Option<String>,
}

impl Slot {
    pub fn new(property_id: Option<i64>, url: Option<String>) -> Self {
        Self { property_id, url }
    }

    /// The stored link, if it is non-empty
    pub fn link(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn is_present(&self) -> bool {
        self.link().is_some()
    }
}

/// A catalog video entry: the original link plus one slot per quality kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: i64,
    pub original: Slot,
    derivatives: [Slot; 5],
}

impl VideoRecord {
    /// Create a record with every derivative slot empty
    pub fn new(id: i64, original: Slot) -> Self {
        Self {
            id,
            original,
            derivatives: Default::default(),
        }
    }

    /// Builder-style setter for one derivative slot
    pub fn with_derivative(mut self, quality: Quality, slot: Slot) -> Self {
        self.derivatives[quality.index()] = slot;
        self
    }

    pub fn slot(&self, quality: Quality) -> &Slot {
        &self.derivatives[quality.index()]
    }

    pub fn slot_mut(&mut self, quality: Quality) -> &mut Slot {
        &mut self.derivatives[quality.index()]
    }

    /// All five derivative slots are present
    pub fn is_complete(&self) -> bool {
        self.derivatives.iter().all(Slot::is_present)
    }

    /// At least one derivative slot is present, but not all of them
    pub fn is_partially_populated(&self) -> bool {
        self.derivatives.iter().any(Slot::is_present) && !self.is_complete()
    }

    /// Quality kinds whose slot is not present, highest resolution first
    pub fn missing_qualities(&self) -> Vec<Quality> {
        Quality::ALL
            .into_iter()
            .filter(|quality| !self.slot(*quality).is_present())
            .collect()
    }
}

/// Catalog property IDs for each quality kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPropertyMap {
    ids: [i64; 5],
}

impl QualityPropertyMap {
    pub fn new(p1080: i64, p720: i64, p480: i64, p360: i64, preview: i64) -> Self {
        Self {
            ids: [p1080, p720, p480, p360, preview],
        }
    }

    pub fn property_id(&self, quality: Quality) -> i64 {
        self.ids[quality.index()]
    }
}

/// Normalize a remote file name for local use: trim it and replace spaces with dashes
pub fn sanitize_file_name(name: &str) -> String {
    name.trim().replace(' ', "-")
}
