//! Durable registry snapshots.
//!
//! The registry hands every post-mutation snapshot to a [`PersistenceSink`].
//! Writes overwrite the previous snapshot; there is no journal.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Mutex, PoisonError};

use crate::config::StationConfig;
use crate::registry::BeaconEntry;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for full registry snapshots.
pub trait PersistenceSink: Send + Sync {
    fn store(&self, entries: &[BeaconEntry]) -> Result<(), PersistError>;
}

/// Rewrites the station config file with the current device list.
///
/// The document is written to a sibling temp file and renamed over the
/// target so a crash mid-write never leaves a truncated config behind.
pub struct JsonFileSink {
    path: PathBuf,
    template: StationConfig,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>, template: StationConfig) -> Self {
        Self {
            path: path.into(),
            template,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl PersistenceSink for JsonFileSink {
    fn store(&self, entries: &[BeaconEntry]) -> Result<(), PersistError> {
        let mut json = self.template.with_devices(entries).to_json_pretty()?;
        json.push('\n');

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(json.as_bytes()).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        log::debug!("Registry snapshot ({} devices) written to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Keeps every snapshot in memory so tests can observe persistence writes.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    writes: Mutex<Vec<Vec<BeaconEntry>>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots stored so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last(&self) -> Option<Vec<BeaconEntry>> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[cfg(test)]
impl PersistenceSink for MemorySink {
    fn store(&self, entries: &[BeaconEntry]) -> Result<(), PersistError> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entries.to_vec());
        Ok(())
    }
}

impl<T: PersistenceSink + ?Sized> PersistenceSink for std::sync::Arc<T> {
    fn store(&self, entries: &[BeaconEntry]) -> Result<(), PersistError> {
        (**self).store(entries)
    }
}
