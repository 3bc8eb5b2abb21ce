//! Progress events and run counters
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


use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome events reported by workers during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountEvent {
    /// Number of candidate videos returned by the catalog
    Discovered(u64),
    Converted,
    ConvertFailed,
    Uploaded,
    UploadFailed,
    /// Every started video worker has finished
    RunComplete,
}

/// Totals accumulated over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub discovered: u64,
    pub converted: u64,
    pub convert_failed: u64,
    pub uploaded: u64,
    pub upload_failed: u64,
}

impl RunCounters {
    /// Fold one event into the totals.
    ///
    /// Returns `true` for the run-complete event, which carries no count.
    pub fn apply(&mut self, event: CountEvent) -> bool {
        match event {
            CountEvent::Discovered(n) => self.discovered += n,
            CountEvent::Converted => self.converted += 1,
            CountEvent::ConvertFailed => self.convert_failed += 1,
            CountEvent::Uploaded => self.uploaded += 1,
            CountEvent::UploadFailed => self.upload_failed += 1,
            CountEvent::RunComplete => return true,
        }
        false
    }

    /// A run is degraded when any derivative failed to convert or upload
    pub fn is_degraded(&self) -> bool {
        self.convert_failed > 0 || self.upload_failed > 0
    }
}

impl fmt::Display for RunCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Videos discovered: {}", self.discovered)?;
        writeln!(f, "Converted: {}", self.converted)?;
        writeln!(f, "Not converted: {}", self.convert_failed)?;
        writeln!(f, "Uploaded: {}", self.uploaded)?;
        write!(f, "Not uploaded: {}", self.upload_failed)
    }
}
