//! Per-beacon RSSI accumulation between flushes.
//!
//! The ingestion path appends under a short lock. A flush swaps the whole
//! buffer for an empty one inside the same lock, so every recorded sample
//! lands in exactly one drained batch. Encoding and publishing happen on the
//! drained copy after the lock is released.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Received signal strength in dBm.
pub type Rssi = i8;

/// Samples per report label, each sequence in arrival order.
pub type MeasurementMap = BTreeMap<String, Vec<Rssi>>;

#[derive(Default)]
pub struct Aggregator {
    buffer: Mutex<MeasurementMap>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sample` to `label`'s sequence.
    pub fn record(&self, label: &str, sample: Rssi) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        match buffer.get_mut(label) {
            Some(samples) => samples.push(sample),
            None => {
                buffer.insert(label.to_string(), vec![sample]);
            }
        }
    }

    /// Take everything recorded since the previous drain.
    pub fn drain_and_reset(&self) -> MeasurementMap {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer)
    }

    /// Total samples waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}
