//! MQTT transport.
//!
//! One `rumqttc` sync client per station. The [`MqttTransport`] half
//! enqueues measurement reports without blocking; the [`MqttInbound`] half
//! drives the connection on its own thread and hands control-topic
//! messages to the command processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS};

use crate::comm::CommandProcessor;
use crate::config::StationConfig;
use crate::transport::{Transport, TransportError};

/// Request queue depth between the client handles and the event loop.
const REQUEST_CAPACITY: usize = 16;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Consecutive connection failures tolerated before giving up.
pub const MAX_CONNECT_FAILURES: u32 = 10;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("broker unreachable after {attempts} attempts: {source}")]
    ConnectionLost {
        attempts: u32,
        #[source]
        source: ConnectionError,
    },
}

/// Publishing half.
#[derive(Clone)]
pub struct MqttTransport {
    client: Client,
}

impl MqttTransport {
    /// Request a clean disconnect. Requests queued before it (the final
    /// report) are written first; the inbound loop exits once the
    /// DISCONNECT packet has gone out.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request failed: {e}");
        }
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Connection-driving half.
pub struct MqttInbound {
    client: Client,
    connection: Connection,
    subscribe_topic: String,
}

/// Create the client for `config`. No network traffic happens until
/// [`MqttInbound::run`] starts polling.
pub fn connect(config: &StationConfig) -> (MqttTransport, MqttInbound) {
    let mut options = MqttOptions::new(config.id.as_str(), config.broker_ip.as_str(), config.broker_port);
    options.set_keep_alive(KEEP_ALIVE);

    let (client, connection) = Client::new(options, REQUEST_CAPACITY);
    (
        MqttTransport {
            client: client.clone(),
        },
        MqttInbound {
            client,
            connection,
            subscribe_topic: config.subscribe_topic.clone(),
        },
    )
}

fn backoff(failures: u32) -> Duration {
    let secs = 1u64 << failures.saturating_sub(1).min(5);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

impl MqttInbound {
    /// Poll the connection until a requested disconnect has been written.
    ///
    /// The control topic is (re)subscribed on every ConnAck, since a clean
    /// session loses subscriptions across reconnects. Connection errors are
    /// retried with exponential backoff; after [`MAX_CONNECT_FAILURES`] in a
    /// row the error is returned and the station should exit. Once
    /// `shutdown` is set a connection error ends the loop instead.
    pub fn run(mut self, commands: &CommandProcessor, shutdown: &AtomicBool) -> Result<(), MqttError> {
        let mut failures = 0u32;

        for notification in self.connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if failures > 0 {
                        log::info!("Reconnected to broker");
                    } else {
                        log::info!("Connected to broker");
                    }
                    failures = 0;
                    match self.client.try_subscribe(self.subscribe_topic.as_str(), QoS::ExactlyOnce) {
                        Ok(()) => log::info!("Subscribed to {}", self.subscribe_topic),
                        Err(e) => log::warn!("Subscribe to {} failed: {e}", self.subscribe_topic),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    commands.on_message(&msg.topic, &msg.payload);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    log::info!("Disconnected from broker");
                    break;
                }
                Ok(_) => {}
                Err(e) if shutdown.load(Ordering::Relaxed) => {
                    log::warn!("MQTT connection lost during shutdown: {e}");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONNECT_FAILURES {
                        return Err(MqttError::ConnectionLost {
                            attempts: failures,
                            source: e,
                        });
                    }
                    let wait = backoff(failures);
                    log::warn!("MQTT connection error ({e}), retrying in {wait:?}");
                    thread::sleep(wait);
                }
            }
        }

        log::info!("MQTT loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemorySink;
    use crate::registry::Registry;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    fn config(port: u16) -> StationConfig {
        StationConfig::from_json(&format!(
            r#"{{"id":"S1","devices":[],"broker_ip":"127.0.0.1","broker_port":{port},
                "publish_topic":"rssi","subscribe_topic":"cmd","scan_interval":1.0,"send_interval":1.0}}"#
        ))
        .unwrap()
    }

    /// One MQTT control packet: first header byte and body.
    fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let mut header = [0u8; 1];
        stream.read_exact(&mut header).ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).ok()?;
            len |= ((byte[0] & 0x7f) as usize) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).ok()?;
        Some((header[0], body))
    }

    /// Accepts one client, acknowledges CONNECT and SUBSCRIBE, and returns
    /// `(packet type, payload)` for every packet up to DISCONNECT.
    fn fake_broker(listener: TcpListener) -> thread::JoinHandle<Vec<(u8, Vec<u8>)>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut seen = Vec::new();
            while let Some((header, body)) = read_packet(&mut stream) {
                let kind = header >> 4;
                match kind {
                    1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap(),
                    3 => {
                        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                        let qos = (header >> 1) & 0x03;
                        let start = 2 + topic_len + if qos > 0 { 2 } else { 0 };
                        if qos == 1 {
                            let pkid = &body[2 + topic_len..start];
                            stream.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).unwrap();
                        }
                        seen.push((kind, body[start..].to_vec()));
                        continue;
                    }
                    8 => stream.write_all(&[0x90, 0x03, body[0], body[1], 0x02]).unwrap(),
                    _ => {}
                }
                seen.push((kind, Vec::new()));
                if kind == 14 {
                    break;
                }
            }
            seen
        })
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let waits: Vec<u64> = (1..=8).map(|n| backoff(n).as_secs()).collect();
        assert_eq!(waits, [1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn connect_builds_client_without_network() {
        let (transport, inbound) = connect(&config(18830));
        assert_eq!(inbound.subscribe_topic, "cmd");

        // The request queue accepts the publish even though nothing is polling.
        assert!(transport.publish("rssi", b"{}").is_ok());
    }

    #[test]
    fn final_report_is_written_before_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = fake_broker(listener);

        let (transport, inbound) = connect(&config(port));
        let commands = CommandProcessor::new(Arc::new(Registry::new(
            Vec::new(),
            Box::new(MemorySink::new()),
        )));
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = Arc::clone(&shutdown);
        let mqtt = thread::spawn(move || inbound.run(&commands, &loop_shutdown));

        // Same order as the binary: flag, final flush, disconnect.
        shutdown.store(true, Ordering::Relaxed);
        transport.publish("rssi", br#"{"station-id":"S1","map":{}}"#).unwrap();
        transport.disconnect();

        mqtt.join().unwrap().unwrap();
        let seen = broker.join().unwrap();
        let kinds: Vec<u8> = seen.iter().map(|(k, _)| *k).collect();
        let publish = kinds.iter().position(|&k| k == 3).expect("no PUBLISH received");
        let disconnect = kinds.iter().position(|&k| k == 14).expect("no DISCONNECT received");
        assert!(publish < disconnect, "packets out of order: {kinds:?}");
        assert_eq!(seen[publish].1, br#"{"station-id":"S1","map":{}}"#.to_vec());
    }
}
