//! Periodic publisher: drains the aggregator on a fixed tick and publishes
//! one measurement report per tick.
//!
//! Ticks are scheduled against absolute deadlines, so a slow publish does
//! not push later flushes back. A failed publish is logged and that
//! interval's samples are gone; the next tick starts from an empty buffer.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregator::Aggregator;
use crate::config::StationConfig;
use crate::protocol::MeasurementReport;
use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("cannot encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What one flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Published { beacons: usize, samples: usize },
    /// Nothing recorded and empty reports are disabled.
    Skipped,
}

pub struct PeriodicPublisher {
    station_id: String,
    topic: String,
    interval: Duration,
    publish_empty: bool,
    aggregator: Arc<Aggregator>,
    transport: Arc<dyn Transport>,
}

impl PeriodicPublisher {
    pub fn new(
        config: &StationConfig,
        aggregator: Arc<Aggregator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            station_id: config.id.clone(),
            topic: config.publish_topic.clone(),
            interval: config.send_interval(),
            publish_empty: config.publish_empty,
            aggregator,
            transport,
        }
    }

    /// Drain the aggregator and publish what it held.
    ///
    /// An empty drain still produces a report unless `publish_empty` is off;
    /// the collector uses it as a liveness signal.
    pub fn flush(&self) -> Result<FlushOutcome, FlushError> {
        let map = self.aggregator.drain_and_reset();
        if map.is_empty() && !self.publish_empty {
            return Ok(FlushOutcome::Skipped);
        }

        let beacons = map.len();
        let samples: usize = map.values().map(Vec::len).sum();
        let payload = MeasurementReport {
            station_id: &self.station_id,
            map: &map,
        }
        .to_json()?;

        self.transport.publish(&self.topic, &payload)?;
        Ok(FlushOutcome::Published { beacons, samples })
    }

    fn flush_logged(&self) {
        match self.flush() {
            Ok(FlushOutcome::Published { beacons, samples }) => {
                log::debug!("Published {samples} samples from {beacons} beacons to {}", self.topic)
            }
            Ok(FlushOutcome::Skipped) => log::debug!("Nothing heard this interval"),
            Err(e) => log::warn!("Flush dropped: {e}"),
        }
    }

    /// Flush every interval until `shutdown` receives a message or its
    /// sender is dropped. Samples still pending at shutdown are flushed
    /// once more before returning.
    pub fn run(&self, shutdown: &Receiver<()>) {
        log::info!(
            "Publisher started: every {:?} to {}",
            self.interval,
            self.topic
        );

        let mut next = Instant::now() + self.interval;
        loop {
            let wait = next.saturating_duration_since(Instant::now());
            match shutdown.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            self.flush_logged();

            next += self.interval;
            let now = Instant::now();
            if next < now {
                log::warn!("Publisher fell behind, skipping missed ticks");
                next = now + self.interval;
            }
        }

        if self.aggregator.pending() > 0 {
            log::info!("Final flush before shutdown");
            self.flush_logged();
        }
        log::info!("Publisher stopped");
    }
}
