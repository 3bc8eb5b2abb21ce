//! Progress Aggregator
//!
//! Workers report outcome events through cloneable [`ProgressReporter`]
//! handles; a single [`ProgressAggregator`] owns the run counters and folds
//! every event into them.
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


use converter_types::{CountEvent, RunCounters};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why the aggregator stopped accumulating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The scheduler reported that every video worker finished
    Completed,
    DeadlineExpired,
    /// Operator-initiated shutdown
    Aborted,
}

/// Final counters of a run and how it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub counters: RunCounters,
    pub reason: StopReason,
}

/// Producer handle for count events
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<CountEvent>,
}

impl ProgressReporter {
    /// Queue an event; never waits. Events sent after the aggregator stopped are dropped.
    pub fn report(&self, event: CountEvent) {
        if self.tx.send(event).is_err() {
            debug!(?event, "Progress aggregator stopped, event dropped");
        }
    }
}

/// Single consumer of count events
pub struct ProgressAggregator {
    rx: mpsc::UnboundedReceiver<CountEvent>,
    counters: RunCounters,
}

/// Create a connected reporter and aggregator
pub fn channel() -> (ProgressReporter, ProgressAggregator) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressReporter { tx },
        ProgressAggregator {
            rx,
            counters: RunCounters::default(),
        },
    )
}

impl ProgressAggregator {
    /// Accumulate events until the run completes or `stop` resolves.
    ///
    /// When every reporter is dropped without a run-complete event the run
    /// counts as completed. On an early stop, events already queued are
    /// still counted.
    pub async fn run<F>(mut self, stop: F) -> RunReport
    where
        F: Future<Output = StopReason>,
    {
        tokio::pin!(stop);

        let reason = loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        if self.counters.apply(event) {
                            break StopReason::Completed;
                        }
                    }
                    None => break StopReason::Completed,
                },
                reason = &mut stop => break reason,
            }
        };

        if reason != StopReason::Completed {
            warn!(?reason, "Run stopped before completion");
            self.drain();
        }

        info!(
            discovered = self.counters.discovered,
            converted = self.counters.converted,
            convert_failed = self.counters.convert_failed,
            uploaded = self.counters.uploaded,
            upload_failed = self.counters.upload_failed,
            ?reason,
            "Progress aggregation finished"
        );

        RunReport {
            counters: self.counters,
            reason,
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if self.counters.apply(event) {
                break;
            }
        }
    }
}
