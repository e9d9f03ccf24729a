//! Discovery events from the radio scanner.
//!
//! The scanner itself runs outside this process. It streams one JSON object
//! per line, each carrying at least the advertiser address and RSSI:
//!
//! ```text
//! {"mac":"AA:BB:CC:DD:EE:01","rssi":-70}
//! {"type":"ble","mac":"58:8E:81:AA:BB:CC","name":"FS Ext Battery","rssi":-60,"mfr":2504}
//! ```
//!
//! Extra fields are ignored, so NDJSON from existing BLE scanners can be piped
//! in unchanged.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::aggregator::Rssi;
use crate::filter::ScanIngestion;
use crate::mac::MacAddress;

/// One advertisement heard by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub address: MacAddress,
    pub rssi: Rssi,
}

impl DiscoveryEvent {
    pub fn new(address: MacAddress, rssi: Rssi) -> Self {
        Self { address, rssi }
    }
}

#[derive(Deserialize)]
struct RawDiscovery {
    mac: MacAddress,
    rssi: Rssi,
}

/// Parse one NDJSON line. Blank and malformed lines yield `None`.
pub fn parse_discovery_line(line: &str) -> Option<DiscoveryEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<RawDiscovery>(trimmed) {
        Ok(raw) => Some(DiscoveryEvent::new(raw.mac, raw.rssi)),
        Err(e) => {
            log::debug!("Skipping discovery line {trimmed:?}: {e}");
            None
        }
    }
}

/// Feed every line of `reader` to `ingestion` until EOF or until `shutdown`
/// is set.
///
/// Returns `Ok(())` on EOF or shutdown. Read errors are returned to the
/// caller, which treats them as a scanner failure.
pub fn run_line_source<R: BufRead>(
    mut reader: R,
    ingestion: &ScanIngestion,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let mut line = String::new();
    while !shutdown.load(Ordering::Relaxed) {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            log::info!("Discovery stream closed");
            return Ok(());
        }
        if let Some(event) = parse_discovery_line(&line) {
            ingestion.handle(&event);
        }
    }
    Ok(())
}
