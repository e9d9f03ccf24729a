//! Beacon station: one process per physical location.
//!
//! Usage: `beacon-station <station.json> < discovery.ndjson`
//!
//! Discovery events arrive as NDJSON on stdin, reports go to the broker
//! named in the config, and registry changes received on the control topic
//! are written back into the same config file.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use beacon_station::station::Station;
use beacon_station::VERSION;

/// How often the main thread checks for shutdown and fatal errors.
const POLL: Duration = Duration::from_millis(200);

/// How long shutdown waits for the final report and DISCONNECT to go out.
#[cfg(feature = "mqtt")]
const MQTT_DRAIN: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(version, about = "BLE beacon proximity station")]
struct Args {
    /// Station configuration file; rewritten when the tracked set changes.
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("Beacon station v{VERSION} starting");

    let station = Station::from_config_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let config = station.config().clone();
    log::info!(
        "Station {} tracking {} beacons, flushing every {:?} to {}",
        config.id,
        station.registry().len(),
        config.send_interval(),
        config.publish_topic,
    );

    // ── Shutdown plumbing ────────────────────────────────────────────

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
    }
    let (fatal_tx, fatal_rx) = mpsc::channel::<anyhow::Error>();

    // ── Transport + command thread ───────────────────────────────────

    #[cfg(feature = "mqtt")]
    let mqtt = {
        let (transport, inbound) = beacon_station::mqtt::connect(&config);
        let commands = Arc::clone(station.commands());
        let mqtt_shutdown = Arc::clone(&shutdown);
        let mqtt_fatal = fatal_tx.clone();
        let thread = std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                if let Err(e) = inbound.run(&commands, &mqtt_shutdown) {
                    let _ = mqtt_fatal.send(e.into());
                }
            })
            .context("spawning MQTT thread")?;
        log::info!(
            "MQTT client for {}:{} started, control topic {}",
            config.broker_ip,
            config.broker_port,
            config.subscribe_topic
        );
        (Arc::new(transport), thread)
    };

    #[cfg(feature = "mqtt")]
    let transport: Arc<dyn beacon_station::transport::Transport> = mqtt.0.clone();

    #[cfg(not(feature = "mqtt"))]
    let transport: Arc<dyn beacon_station::transport::Transport> = {
        log::warn!("Built without MQTT: reports are logged, control commands are not received");
        Arc::new(beacon_station::transport::LogTransport)
    };

    // ── Publisher + scanner threads ──────────────────────────────────

    let publisher = station
        .spawn_publisher(transport)
        .context("spawning publisher thread")?;

    station
        .spawn_scanner(io::BufReader::new(io::stdin()), Arc::clone(&shutdown), fatal_tx)
        .context("spawning scanner thread")?;

    // ── Supervise ────────────────────────────────────────────────────

    let result = supervise(&station, &shutdown, &fatal_rx);

    shutdown.store(true, Ordering::Relaxed);
    publisher.stop();
    #[cfg(feature = "mqtt")]
    {
        let (client, thread) = mqtt;
        client.disconnect();
        join_within(thread, MQTT_DRAIN);
    }

    log::info!("Beacon station stopped");
    result
}

/// Block until shutdown is requested or a worker reports a fatal error.
/// Logs ingestion totals once per scan interval.
fn supervise(
    station: &Station,
    shutdown: &AtomicBool,
    fatal_rx: &mpsc::Receiver<anyhow::Error>,
) -> anyhow::Result<()> {
    let stats_every = station.config().scan_interval();
    let mut last_stats = Instant::now();
    let mut seen = station.ingestion().stats();

    while !shutdown.load(Ordering::Relaxed) {
        match fatal_rx.recv_timeout(POLL) {
            Ok(e) => {
                log::error!("Fatal: {e:#}");
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {}
            // Every worker that could report has exited cleanly.
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL),
        }

        if !stats_every.is_zero() && last_stats.elapsed() >= stats_every {
            let now = station.ingestion().stats();
            log::debug!(
                "Scan round: {} accepted, {} dropped",
                now.accepted - seen.accepted,
                now.dropped - seen.dropped
            );
            seen = now;
            last_stats = Instant::now();
        }
    }

    log::info!("Shutdown requested");
    Ok(())
}

/// Wait up to `timeout` for `thread` to exit.
#[cfg(feature = "mqtt")]
fn join_within(thread: std::thread::JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("MQTT client did not disconnect within {timeout:?}");
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if thread.join().is_err() {
        log::error!("MQTT thread panicked");
    }
}
