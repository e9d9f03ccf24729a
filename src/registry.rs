//! Set of beacons this station tracks.
//!
//! Reads (one per discovery event) take a shared lock and never wait on I/O.
//! Mutations are serialized by a separate writer lock that is held across
//! the in-memory change and the persistence write, so snapshots reach the
//! sink in mutation order while readers only contend with the brief
//! in-memory update.

use std::sync::{Mutex, PoisonError, RwLock};

use crate::mac::MacAddress;
use crate::persist::PersistenceSink;

/// A tracked beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconEntry {
    pub address: MacAddress,
    /// Display name. Unlabeled beacons report under their address.
    pub label: Option<String>,
}

impl BeaconEntry {
    pub fn new(address: MacAddress, label: Option<String>) -> Self {
        Self { address, label }
    }

    /// Key under which this beacon's samples are reported.
    pub fn report_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.address.to_string(),
        }
    }
}

/// Result of one registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Entries inserted or removed.
    pub changed: usize,
    /// Whether the post-mutation snapshot reached the sink.
    pub persisted: bool,
}

pub struct Registry {
    entries: RwLock<Vec<BeaconEntry>>,
    writer: Mutex<()>,
    sink: Box<dyn PersistenceSink>,
}

impl Registry {
    /// Build from a startup snapshot. Later duplicates of an address are
    /// dropped.
    pub fn new(initial: Vec<BeaconEntry>, sink: Box<dyn PersistenceSink>) -> Self {
        let mut entries: Vec<BeaconEntry> = Vec::with_capacity(initial.len());
        for entry in initial {
            if !entries.iter().any(|e| e.address == entry.address) {
                entries.push(entry);
            }
        }
        Self {
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
            sink,
        }
    }

    /// Report label for `address`, if tracked.
    pub fn lookup_label(&self, address: &MacAddress) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|e| e.address == *address)
            .map(BeaconEntry::report_label)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in insertion order.
    pub fn snapshot(&self) -> Vec<BeaconEntry> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Insert `address` unless it is already tracked.
    pub fn add(&self, address: MacAddress, label: Option<String>) -> Applied {
        self.add_all(vec![BeaconEntry::new(address, label)])
    }

    /// Insert every entry whose address is not yet tracked, then persist once.
    pub fn add_all(&self, new_entries: Vec<BeaconEntry>) -> Applied {
        self.mutate(|entries| {
            let mut added = 0;
            for entry in new_entries {
                if entries.iter().any(|e| e.address == entry.address) {
                    log::debug!("Beacon {} already tracked, skipping", entry.address);
                    continue;
                }
                log::info!("Tracking beacon {} as {:?}", entry.address, entry.report_label());
                entries.push(entry);
                added += 1;
            }
            added
        })
    }

    /// Remove `address` if tracked.
    pub fn remove(&self, address: &MacAddress) -> Applied {
        self.remove_all(core::slice::from_ref(address))
    }

    /// Remove every listed address that is tracked, then persist once.
    pub fn remove_all(&self, addresses: &[MacAddress]) -> Applied {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| {
                let keep = !addresses.contains(&e.address);
                if !keep {
                    log::info!("No longer tracking beacon {}", e.address);
                }
                keep
            });
            before - entries.len()
        })
    }

    /// Remove every entry whose explicit label is `label`, then persist once.
    pub fn remove_label(&self, label: &str) -> Applied {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| {
                let keep = e.label.as_deref() != Some(label);
                if !keep {
                    log::info!("No longer tracking beacon {} ({label})", e.address);
                }
                keep
            });
            before - entries.len()
        })
    }

    fn mutate(&self, change: impl FnOnce(&mut Vec<BeaconEntry>) -> usize) -> Applied {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let (changed, snapshot) = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let changed = change(&mut entries);
            (changed, entries.clone())
        };

        let persisted = match self.sink.store(&snapshot) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Registry persistence failed, keeping in-memory state: {e}");
                false
            }
        };

        Applied { changed, persisted }
    }
}
