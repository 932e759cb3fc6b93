// ecowitt_statsd - StatsD and Prometheus metrics bridge for Ecowitt weather gateways
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::{ClientError, EcowittClient};
use crate::metrics::GaugeSink;
use crate::normalize::Normalizer;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Level};

/// Shortest interval between scans, anything shorter (i.e. zero) is raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Polls a gateway at a fixed interval and emits gauges for every reading.
#[derive(Debug)]
pub struct Scanner<S> {
    client: EcowittClient,
    normalizer: Normalizer<S>,
    interval: Duration,
}

impl<S> Scanner<S>
where
    S: GaugeSink + 'static,
{
    pub fn new(client: EcowittClient, normalizer: Normalizer<S>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!(
                message = "scan interval must be non-zero, using minimum",
                interval_secs = MIN_INTERVAL.as_secs_f64(),
            );
            MIN_INTERVAL
        } else {
            interval
        };

        Scanner {
            client,
            normalizer,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch live data from the gateway once and emit gauges for all of it, returning
    /// the number of gauges emitted.
    ///
    /// Readings that can't be parsed are skipped and don't cause this method to fail.
    pub async fn scan_once(&self) -> Result<usize, ClientError> {
        let res = self.client.live_data().await?;
        Ok(self.normalizer.emit_all(&res))
    }

    /// Start polling the gateway in a background task, returning a handle that can
    /// be used to stop it. The first scan happens immediately.
    pub fn start(self) -> ScanHandle {
        // A single slot is enough: any pending request means "stop"
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(rx));
        ScanHandle { stop: tx, task }
    }

    async fn run(self, mut stop: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            message = "gateway polling started",
            url = %self.client.url(),
            interval_secs = self.interval.as_secs_f64(),
        );

        loop {
            // Scans run to completion inside the branch, a stop request is only
            // seen once the loop is back to waiting here.
            tokio::select! {
                _ = interval.tick() => {
                    match self
                        .scan_once()
                        .instrument(tracing::span!(Level::DEBUG, "ecowitt_scan"))
                        .await
                    {
                        Ok(gauges) => {
                            tracing::info!(message = "scanned gateway", gauges = gauges);
                        }
                        Err(e) => {
                            tracing::error!(message = "failed to scan gateway", error = %e);
                        }
                    }
                }
                _ = stop.recv() => {
                    break;
                }
            }
        }

        tracing::info!("gateway polling stopped");
    }
}

/// Handle to a running `Scanner`.
///
/// Dropping the handle also stops the scanner (after any in progress scan).
#[derive(Debug)]
pub struct ScanHandle {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ScanHandle {
    /// Ask the scanner to stop. This does not wait for it to stop or interrupt a
    /// scan that is in progress. Calling this more than once has no extra effect.
    pub fn stop(&self) {
        // Full means a stop is already pending, closed means already stopped
        let _ = self.stop.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scanner to finish after calling `stop()`.
    pub async fn wait(self) -> Result<(), JoinError> {
        let ScanHandle { stop, task } = self;
        let res = task.await;
        drop(stop);
        res
    }
}
