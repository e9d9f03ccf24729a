//! Outbound side of the publish/subscribe channel.
//!
//! The inbound side needs no trait: transports call
//! [`CommandProcessor::on_message`](crate::comm::CommandProcessor::on_message)
//! for every control message they receive.

#[cfg(test)]
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Writes every report to the log instead of a broker. Used when the
/// station is built without MQTT support.
pub struct LogTransport;

impl Transport for LogTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        log::info!("[{topic}] {}", String::from_utf8_lossy(payload));
        Ok(())
    }
}

/// Keeps published messages in memory for tests; optionally fails every
/// publish.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every publish fails with `NotConnected`.
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::NotConnected);
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        (**self).publish(topic, payload)
    }
}
