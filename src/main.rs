//! Open house gateway - double tap a card reader to toggle open house
//!
//! Watches scans from the facility's card readers. Two taps by the same card
//! at the same reader within a short window toggle "open house": the doors of
//! the scheduled window unlock until the window ends or someone with
//! permission double taps again.
//!
//! Module structure:
//! - `domain/` - Core types (ScanEvent, OpenHouseWindow, sessions)
//! - `io/` - External interfaces (scan listener, Prometheus)
//! - `services/` - Business logic (Coordinator, ScanBuffer, state machine, doors)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use open_house_gateway::infra::{ActuatorMode, Config, Metrics};
use open_house_gateway::io::{start_metrics_server, start_scan_listener, ScanListenerConfig};
use open_house_gateway::services::{
    create_door_worker, Coordinator, DoorDirectory, IdentityDirectory, StaticDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Open house gateway - double tap card readers to toggle door unlocks
#[derive(Parser, Debug)]
#[command(name = "gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for every scan
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "open-house-gateway starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config)?;

    let actuator_mode = match config.actuator_mode() {
        ActuatorMode::Http => "http",
        ActuatorMode::Log => "log",
    };
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        scan_window_secs = %config.scan_window().as_secs(),
        listener_port = %config.listener_port(),
        actuator_mode = %actuator_mode,
        doors = %config.doors().len(),
        windows = %config.windows().len(),
        people = %config.people().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let doors = Arc::new(DoorDirectory::from_config(&config)?);
    let directory: Arc<dyn IdentityDirectory> =
        Arc::new(StaticDirectory::from_entries(config.people()));

    // Door commands run on their own task so door I/O never holds up scans
    let (door_tx, door_worker) =
        create_door_worker(doors.clone(), metrics.clone(), config.door_queue_size());
    let worker_handle = tokio::spawn(door_worker.run());

    let coordinator =
        Arc::new(Coordinator::new(&config, doors, directory, door_tx, metrics.clone()));

    let maintenance = tokio::spawn(coordinator.clone().run_maintenance(shutdown_rx.clone()));

    let listener_config = ScanListenerConfig {
        port: config.listener_port(),
        enabled: config.listener_enabled(),
    };
    let listener_coordinator = coordinator.clone();
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_scan_listener(
            listener_config,
            listener_coordinator,
            listener_metrics,
            listener_shutdown,
        )
        .await
        {
            error!(error = %e, "scan_listener_error");
        }
    });

    let prom_metrics = metrics.clone();
    let prom_shutdown = shutdown_rx.clone();
    let prometheus_port = config.prometheus_port();
    let site_id = config.site_id().to_string();
    tokio::spawn(async move {
        if let Err(e) =
            start_metrics_server(prometheus_port, prom_metrics, site_id, prom_shutdown).await
        {
            error!(error = %e, "prometheus_metrics_server_error");
        }
    });

    // Periodic metrics summary
    let report_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut report_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => report_metrics.report().log(),
                _ = report_shutdown.changed() => {
                    if *report_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Let queued door commands drain; open reader connections may still hold
    // the coordinator, so the wait is bounded
    let _ = maintenance.await;
    drop(coordinator);
    if tokio::time::timeout(Duration::from_secs(5), worker_handle).await.is_err() {
        info!("door_cmd_worker_drain_timeout");
    }

    info!("open-house-gateway shutdown complete");
    Ok(())
}
