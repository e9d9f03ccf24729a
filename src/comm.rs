//! Command processing: applies control-topic messages to the registry.
//!
//! Every decoded command mutates the registry and persists it, even when the
//! change turned out to be a no-op. Payloads that fail to decode leave the
//! registry and its snapshot untouched.

use std::sync::Arc;

use crate::protocol::{parse_command, Command, CommandError};
use crate::registry::{Applied, BeaconEntry, Registry};

pub struct CommandProcessor {
    registry: Arc<Registry>,
}

impl CommandProcessor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Decode and apply one inbound payload.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<Applied, CommandError> {
        let cmd = parse_command(payload)?;
        Ok(self.apply(cmd))
    }

    /// Inbound message entry point for transports: errors are logged and
    /// the message is discarded.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        match self.handle_payload(payload) {
            Ok(applied) => log::debug!(
                "Command on {topic} applied: {} changed, persisted={}",
                applied.changed,
                applied.persisted
            ),
            Err(e) => log::warn!(
                "Invalid command on {topic} discarded ({e}): {}",
                String::from_utf8_lossy(payload)
            ),
        }
    }

    pub fn apply(&self, cmd: Command) -> Applied {
        match cmd {
            Command::Add { addresses, label } => {
                let entries = addresses
                    .into_iter()
                    .map(|address| BeaconEntry::new(address, label.clone()))
                    .collect();
                self.registry.add_all(entries)
            }
            Command::DeleteAddresses(addresses) => self.registry.remove_all(&addresses),
            Command::DeleteLabel(label) => self.registry.remove_label(&label),
        }
    }
}
