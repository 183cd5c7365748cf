//! Scan TCP listener for card reader events
//!
//! Listens on port 25900 for connections from the reader driver.
//! Protocol, one scan per line:
//! - `SCAN <identity> <device> <location> <granted|denied|1|0> [timestamp]`
//! - or a JSON object with the `ScanEvent` fields
//!
//! The timestamp is facility-local `YYYY-MM-DDTHH:MM:SS[.fff]`; when omitted
//! the scan is stamped with the time it was received.

use crate::domain::types::{
    parse_local_timestamp, DeviceId, IdentityId, LocationId, ScanEvent, ScanOutcome,
    ScanParseError,
};
use crate::infra::metrics::Metrics;
use crate::services::coordinator::Coordinator;
use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Scan listener configuration
#[derive(Debug, Clone)]
pub struct ScanListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for ScanListenerConfig {
    fn default() -> Self {
        Self { port: 25900, enabled: true }
    }
}

/// JSON form of a scan. The outcome stays raw so an unknown value is reported
/// as such rather than as malformed JSON.
#[derive(Debug, Deserialize)]
struct JsonScan {
    identity: IdentityId,
    device: DeviceId,
    location: LocationId,
    scan_time: NaiveDateTime,
    outcome: String,
}

/// Parse one protocol line.
///
/// `Ok(None)` for blank lines and lines that are not scans.
pub fn parse_scan_line(line: &str, now: NaiveDateTime) -> Result<Option<ScanEvent>, ScanParseError> {
    let line = line.trim();
    if line.starts_with('{') {
        let raw: JsonScan = serde_json::from_str(line)?;
        return Ok(Some(ScanEvent {
            identity: raw.identity,
            device: raw.device,
            location: raw.location,
            scan_time: raw.scan_time,
            outcome: ScanOutcome::from_str(&raw.outcome)?,
        }));
    }
    let Some(rest) = line.strip_prefix("SCAN ") else {
        return Ok(None);
    };

    let mut fields = rest.split_whitespace();
    let identity = parse_field(fields.next(), "identity")?;
    let device = parse_field(fields.next(), "device")?;
    let location = parse_field(fields.next(), "location")?;
    let outcome = ScanOutcome::from_str(fields.next().ok_or(ScanParseError::MissingField("outcome"))?)?;
    let scan_time = match fields.next() {
        Some(ts) => parse_local_timestamp(ts)?,
        None => now,
    };

    Ok(Some(ScanEvent {
        identity: IdentityId(identity),
        device: DeviceId(device),
        location: LocationId(location),
        scan_time,
        outcome,
    }))
}

fn parse_field<T: FromStr>(value: Option<&str>, field: &'static str) -> Result<T, ScanParseError> {
    let value = value.ok_or(ScanParseError::MissingField(field))?;
    value
        .parse()
        .map_err(|_| ScanParseError::InvalidField { field, value: value.to_string() })
}

/// Bind and serve the scan listener until shutdown
pub async fn start_scan_listener(
    config: ScanListenerConfig,
    coordinator: Arc<Coordinator>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("scan_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "scan_listener_started");

    serve_scan_listener(listener, coordinator, metrics, shutdown).await;
    Ok(())
}

/// Accept reader connections on an already bound listener
pub async fn serve_scan_listener(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scan_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let c = coordinator.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_scan_connection(socket, addr, c, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "scan_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_scan_connection(
    socket: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    metrics: Arc<Metrics>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "scan_connection_accepted");

    let mut lines = BufReader::new(socket).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "scan_connection_read_failed");
                break;
            }
        };

        let now = Local::now().naive_local();
        match parse_scan_line(&line, now) {
            Ok(Some(event)) => {
                debug!(
                    peer = %peer,
                    identity = %event.identity,
                    device = %event.device,
                    location = %event.location,
                    outcome = %event.outcome.as_str(),
                    "scan_received"
                );
                let disposition = coordinator.handle_scan(event, now).await;
                debug!(peer = %peer, disposition = %disposition.as_str(), "scan_handled");
            }
            Ok(None) => {
                if !line.trim().is_empty() {
                    debug!(peer = %peer, line = %line, "scan_unknown_message");
                }
            }
            Err(e @ ScanParseError::UnknownOutcome(_)) => {
                // The driver is sending values we cannot interpret; stop trusting it
                error!(peer = %peer, line = %line, error = %e, "scan_unknown_outcome");
                metrics.record_scan_malformed();
                break;
            }
            Err(e) => {
                warn!(peer = %peer, line = %line, error = %e, "scan_malformed");
                metrics.record_scan_malformed();
            }
        }
    }

    debug!(peer = %peer, "scan_connection_closed");
}
