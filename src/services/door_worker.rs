//! Door command worker - carries out door commands off the scan path
//!
//! The coordinator enqueues commands through a bounded mpsc channel and never
//! waits on door hardware. A failing door is logged and skipped; the worker
//! keeps going with the next command.

use crate::domain::types::DoorId;
use crate::infra::metrics::Metrics;
use crate::services::door::DoorDirectory;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A command for one door
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorCmd {
    /// Unlock for `duration`
    Open { door_id: DoorId, duration: Duration, enqueued_at: Instant },
    /// Restore the standing schedule
    Revert { door_id: DoorId, enqueued_at: Instant },
}

impl DoorCmd {
    pub fn door_id(&self) -> DoorId {
        match self {
            DoorCmd::Open { door_id, .. } | DoorCmd::Revert { door_id, .. } => *door_id,
        }
    }

    pub fn enqueued_at(&self) -> Instant {
        match self {
            DoorCmd::Open { enqueued_at, .. } | DoorCmd::Revert { enqueued_at, .. } => *enqueued_at,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            DoorCmd::Open { .. } => "open",
            DoorCmd::Revert { .. } => "revert",
        }
    }
}

pub struct DoorCmdWorker {
    doors: Arc<DoorDirectory>,
    cmd_rx: mpsc::Receiver<DoorCmd>,
    metrics: Arc<Metrics>,
}

impl DoorCmdWorker {
    pub fn new(doors: Arc<DoorDirectory>, cmd_rx: mpsc::Receiver<DoorCmd>, metrics: Arc<Metrics>) -> Self {
        Self { doors, cmd_rx, metrics }
    }

    /// Process commands until every sender is dropped
    pub async fn run(mut self) {
        info!("door_cmd_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            self.execute(cmd).await;
        }

        info!("door_cmd_worker_stopped");
    }

    async fn execute(&self, cmd: DoorCmd) {
        let door_id = cmd.door_id();
        let queue_delay_us = cmd.enqueued_at().elapsed().as_micros() as u64;

        let Some(door) = self.doors.by_id(door_id) else {
            warn!(door_id = %door_id, action = %cmd.action(), "door_not_found");
            self.metrics.record_door_not_found();
            return;
        };

        let start = Instant::now();
        let result = match cmd {
            DoorCmd::Open { duration, .. } => door.actuator.open(duration).await,
            DoorCmd::Revert { .. } => door.actuator.revert().await,
        };
        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_door_cmd(latency_ms, result.is_ok());

        match result {
            Ok(()) => info!(
                door_id = %door_id,
                door = %door.name,
                action = %cmd.action(),
                queue_delay_us = %queue_delay_us,
                latency_ms = %latency_ms,
                "door_cmd_processed"
            ),
            Err(e) => error!(
                door_id = %door_id,
                door = %door.name,
                action = %cmd.action(),
                latency_ms = %latency_ms,
                error = %e,
                "door_cmd_failed"
            ),
        }
    }
}

/// Create a door command channel and worker
///
/// Returns the sender (for the coordinator) and the worker (to be spawned)
pub fn create_door_worker(
    doors: Arc<DoorDirectory>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<DoorCmd>, DoorCmdWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let worker = DoorCmdWorker::new(doors, cmd_rx, metrics);
    (cmd_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DeviceId, LocationId};
    use crate::services::door::{Door, DoorActuator};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl DoorActuator for Recording {
        async fn open(&self, duration: Duration) -> anyhow::Result<()> {
            self.calls.lock().push(format!("open {}", duration.as_secs()));
            if self.fail {
                anyhow::bail!("controller unreachable");
            }
            Ok(())
        }

        async fn revert(&self) -> anyhow::Result<()> {
            self.calls.lock().push("revert".to_string());
            if self.fail {
                anyhow::bail!("controller unreachable");
            }
            Ok(())
        }
    }

    fn directory(doors: Vec<(i32, Arc<Recording>)>) -> Arc<DoorDirectory> {
        let mut directory = DoorDirectory::new();
        for (id, actuator) in doors {
            directory.insert(Door {
                id: DoorId(id),
                name: format!("door-{id}"),
                device: DeviceId(id),
                location: LocationId(1),
                actuator,
            });
        }
        Arc::new(directory)
    }

    #[tokio::test]
    async fn test_worker_runs_commands_in_order() {
        let front = Arc::new(Recording::default());
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) = create_door_worker(directory(vec![(7, front.clone())]), metrics.clone(), 8);
        let handle = tokio::spawn(worker.run());

        let now = Instant::now();
        tx.send(DoorCmd::Open { door_id: DoorId(7), duration: Duration::from_secs(7200), enqueued_at: now })
            .await
            .unwrap();
        tx.send(DoorCmd::Revert { door_id: DoorId(7), enqueued_at: now }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*front.calls.lock(), vec!["open 7200".to_string(), "revert".to_string()]);
        assert_eq!(metrics.door_cmds_total(), 2);
        assert_eq!(metrics.door_cmd_failures_total(), 0);
    }

    #[tokio::test]
    async fn test_failures_and_missing_doors_do_not_stop_worker() {
        let broken = Arc::new(Recording { fail: true, ..Default::default() });
        let healthy = Arc::new(Recording::default());
        let metrics = Arc::new(Metrics::new());
        let doors = directory(vec![(1, broken.clone()), (2, healthy.clone())]);
        let (tx, worker) = create_door_worker(doors, metrics.clone(), 8);
        let handle = tokio::spawn(worker.run());

        let now = Instant::now();
        for door_id in [1, 99, 2] {
            tx.send(DoorCmd::Revert { door_id: DoorId(door_id), enqueued_at: now }).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(broken.calls.lock().len(), 1);
        assert_eq!(healthy.calls.lock().len(), 1);
        assert_eq!(metrics.door_cmd_failures_total(), 1);
        assert_eq!(metrics.doors_not_found_total(), 1);
    }
}
