//! Beacon station library: tracks a configured set of BLE beacons,
//! aggregates their RSSI readings, and reports them to a collector.
//!
//! Three concurrent paths share two pieces of state:
//! - **scan ingestion** (`scanner`, `filter`) reads the [`registry`] and
//!   appends to the [`aggregator`] for every discovery event,
//! - the **publisher** drains the aggregator on a fixed tick and publishes
//!   one report per tick through a [`transport::Transport`],
//! - the **command processor** (`comm`) applies control messages to the
//!   registry and persists it (`persist`).
//!
//! The registry and the aggregator each sit behind their own lock; no code
//! path holds both, and readers never wait on disk I/O. Platform wiring (threads,
//! signals, the MQTT client) lives in `station`, `mqtt` and the binary.

pub mod aggregator;
pub mod comm;
pub mod config;
pub mod filter;
pub mod mac;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod persist;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod scanner;
pub mod station;
pub mod transport;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
