//! Scan ingestion: keep discovery events from tracked beacons, drop the rest.
//!
//! The registry read and the aggregator append are two separate short
//! critical sections; no lock is held across both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::registry::Registry;
use crate::scanner::DiscoveryEvent;

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub dropped: u64,
}

pub struct ScanIngestion {
    registry: Arc<Registry>,
    aggregator: Arc<Aggregator>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl ScanIngestion {
    pub fn new(registry: Arc<Registry>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            registry,
            aggregator,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record `event` if its address is tracked. Returns whether it was kept.
    pub fn handle(&self, event: &DiscoveryEvent) -> bool {
        match self.registry.lookup_label(&event.address) {
            Some(label) => {
                self.aggregator.record(&label, event.rssi);
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;
    use crate::persist::MemorySink;
    use crate::registry::BeaconEntry;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn ingestion() -> (ScanIngestion, Arc<Registry>, Arc<Aggregator>) {
        let registry = Arc::new(Registry::new(
            vec![BeaconEntry::new(mac("AA:BB:CC:DD:EE:01"), Some("beacon1".into()))],
            Box::new(MemorySink::new()),
        ));
        let aggregator = Arc::new(Aggregator::new());
        (
            ScanIngestion::new(Arc::clone(&registry), Arc::clone(&aggregator)),
            registry,
            aggregator,
        )
    }

    #[test]
    fn tracked_event_is_recorded_under_label() {
        let (ingest, _, agg) = ingestion();
        assert!(ingest.handle(&DiscoveryEvent::new(mac("AA:BB:CC:DD:EE:01"), -70)));
        assert!(ingest.handle(&DiscoveryEvent::new(mac("aa:bb:cc:dd:ee:01"), -72)));
        assert_eq!(agg.drain_and_reset()["beacon1"], vec![-70, -72]);
    }

    #[test]
    fn unregistered_event_never_reaches_buffer() {
        let (ingest, _, agg) = ingestion();
        assert!(!ingest.handle(&DiscoveryEvent::new(mac("FF:FF:FF:FF:FF:FF"), -50)));
        assert_eq!(agg.pending(), 0);
        assert!(agg.drain_and_reset().is_empty());
        assert_eq!(ingest.stats(), IngestStats { accepted: 0, dropped: 1 });
    }

    #[test]
    fn follows_registry_changes() {
        let (ingest, registry, agg) = ingestion();
        let newcomer = mac("AA:BB:CC:DD:EE:02");

        assert!(!ingest.handle(&DiscoveryEvent::new(newcomer, -80)));
        registry.add(newcomer, None);
        assert!(ingest.handle(&DiscoveryEvent::new(newcomer, -81)));
        registry.remove(&newcomer);
        assert!(!ingest.handle(&DiscoveryEvent::new(newcomer, -82)));

        let drained = agg.drain_and_reset();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained["AA:BB:CC:DD:EE:02"], vec![-81]);
        assert_eq!(ingest.stats(), IngestStats { accepted: 1, dropped: 2 });
    }

    #[test]
    fn line_source_feeds_ingestion() {
        use std::sync::atomic::AtomicBool;

        let (ingest, _, agg) = ingestion();
        let input = "{\"mac\":\"AA:BB:CC:DD:EE:01\",\"rssi\":-70}\n\
                     garbage\n\
                     \n\
                     {\"mac\":\"FF:FF:FF:FF:FF:FF\",\"rssi\":-50}\n\
                     {\"mac\":\"AA:BB:CC:DD:EE:01\",\"rssi\":-72}\n";
        let shutdown = AtomicBool::new(false);
        crate::scanner::run_line_source(input.as_bytes(), &ingest, &shutdown).unwrap();

        assert_eq!(agg.drain_and_reset()["beacon1"], vec![-70, -72]);
        assert_eq!(ingest.stats(), IngestStats { accepted: 2, dropped: 1 });
    }
}
