//! Double tap coordination
//!
//! The Coordinator is the core's single entry point. It is driven from two
//! sides at once:
//! - `handle_scan` - once per reader scan, from any number of listener tasks
//! - `tick` - the periodic maintenance pass (eviction and session expiry)
//!
//! The scan buffer and the state machine live behind one mutex so a scan
//! toggle and a tick expiry can never interleave. Directory lookups run with
//! the lock released, and door I/O is handed to the `DoorCmdWorker`.

mod handlers;

use crate::domain::session::OpenHouseState;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::authorization::AuthorizationGate;
use crate::services::directory::IdentityDirectory;
use crate::services::door::DoorDirectory;
use crate::services::door_worker::DoorCmd;
use crate::services::open_house::OpenHouseStateMachine;
use crate::services::scan_buffer::ScanBuffer;
use crate::services::schedule::ScheduleResolver;
use chrono::Local;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// What happened to a single scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDisposition {
    /// Reader is not one of the facility's doors
    IgnoredReader,
    /// No earlier tap to pair with; the scan was buffered
    NoMatch,
    /// Double tap by someone without open house permission
    NotPermitted,
    /// A concurrent scan already used this double tap
    AlreadyConsumed,
    /// Authorized double tap while idle, outside every window
    NoWindow,
    /// Open house started
    Opened,
    /// Open house ended
    Closed,
}

impl ScanDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDisposition::IgnoredReader => "ignored_reader",
            ScanDisposition::NoMatch => "no_match",
            ScanDisposition::NotPermitted => "not_permitted",
            ScanDisposition::AlreadyConsumed => "already_consumed",
            ScanDisposition::NoWindow => "no_window",
            ScanDisposition::Opened => "opened",
            ScanDisposition::Closed => "closed",
        }
    }
}

/// Mutable core state, guarded as one unit
#[derive(Debug, Default)]
pub(crate) struct CoreState {
    pub(crate) buffer: ScanBuffer,
    pub(crate) machine: OpenHouseStateMachine,
}

pub struct Coordinator {
    pub(crate) state: Mutex<CoreState>,
    pub(crate) doors: Arc<DoorDirectory>,
    pub(crate) schedule: ScheduleResolver,
    pub(crate) gate: AuthorizationGate,
    pub(crate) door_tx: mpsc::Sender<DoorCmd>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) scan_window: Duration,
    pub(crate) maintenance_interval: Duration,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        doors: Arc<DoorDirectory>,
        directory: Arc<dyn IdentityDirectory>,
        door_tx: mpsc::Sender<DoorCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState::default()),
            doors,
            schedule: ScheduleResolver::new(config.windows().iter().cloned()),
            gate: AuthorizationGate::from_config(config, directory),
            door_tx,
            metrics,
            scan_window: config.scan_window(),
            maintenance_interval: config.maintenance_interval(),
        }
    }

    /// Snapshot of the open house state
    pub fn state(&self) -> OpenHouseState {
        self.state.lock().machine.state().clone()
    }

    pub fn buffered_scans(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Run maintenance ticks until shutdown, sleeping for whatever delay each
    /// tick asks for
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = %self.maintenance_interval.as_secs(), "maintenance_started");
        loop {
            let delay = self.tick(Local::now().naive_local());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("maintenance_stopped");
    }
}
