//! Station assembly: owns the shared registry and aggregator and starts the
//! worker threads that operate on them.
//!
//! Threads:
//! - `scanner`: discovery lines → [`ScanIngestion`]
//! - `publisher`: flush tick → [`PeriodicPublisher`]
//! - transport thread (see `mqtt`): control messages → [`CommandProcessor`]

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::aggregator::Aggregator;
use crate::comm::CommandProcessor;
use crate::config::{ConfigError, StationConfig};
use crate::filter::ScanIngestion;
use crate::persist::{JsonFileSink, PersistenceSink};
use crate::publisher::PeriodicPublisher;
use crate::registry::Registry;
use crate::scanner;
use crate::transport::Transport;

pub struct Station {
    config: StationConfig,
    registry: Arc<Registry>,
    aggregator: Arc<Aggregator>,
    ingestion: Arc<ScanIngestion>,
    commands: Arc<CommandProcessor>,
}

impl Station {
    pub fn new(config: StationConfig, sink: Box<dyn PersistenceSink>) -> Self {
        let registry = Arc::new(Registry::new(config.beacon_entries(), sink));
        let aggregator = Arc::new(Aggregator::new());
        let ingestion = Arc::new(ScanIngestion::new(
            Arc::clone(&registry),
            Arc::clone(&aggregator),
        ));
        let commands = Arc::new(CommandProcessor::new(Arc::clone(&registry)));
        Self {
            config,
            registry,
            aggregator,
            ingestion,
            commands,
        }
    }

    /// Load `path` and persist registry changes back into the same file.
    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let config = StationConfig::load(path)?;
        let sink = JsonFileSink::new(path, config.clone());
        Ok(Self::new(config, Box::new(sink)))
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn ingestion(&self) -> &Arc<ScanIngestion> {
        &self.ingestion
    }

    pub fn commands(&self) -> &Arc<CommandProcessor> {
        &self.commands
    }

    pub fn publisher(&self, transport: Arc<dyn Transport>) -> PeriodicPublisher {
        PeriodicPublisher::new(&self.config, Arc::clone(&self.aggregator), transport)
    }

    /// Start the flush loop on its own thread.
    pub fn spawn_publisher(&self, transport: Arc<dyn Transport>) -> io::Result<PublisherHandle> {
        let publisher = self.publisher(transport);
        let (shutdown, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("publisher".into())
            .spawn(move || publisher.run(&rx))?;
        Ok(PublisherHandle { shutdown, thread })
    }

    /// Start reading discovery lines from `reader` on its own thread.
    ///
    /// EOF sets `shutdown`; a read error is reported on `fatal`.
    pub fn spawn_scanner<R>(
        &self,
        reader: R,
        shutdown: Arc<AtomicBool>,
        fatal: Sender<anyhow::Error>,
    ) -> io::Result<JoinHandle<()>>
    where
        R: BufRead + Send + 'static,
    {
        let ingestion = Arc::clone(&self.ingestion);
        thread::Builder::new().name("scanner".into()).spawn(move || {
            log::info!("Scanner thread started");
            match scanner::run_line_source(reader, &ingestion, &shutdown) {
                Ok(()) => shutdown.store(true, Ordering::Relaxed),
                Err(e) => {
                    let _ = fatal.send(anyhow::Error::new(e).context("discovery stream failed"));
                }
            }
        })
    }
}

/// Running publisher thread.
pub struct PublisherHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl PublisherHandle {
    /// Ask for a final flush and wait for the thread to finish.
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            log::error!("Publisher thread panicked");
        }
    }
}
