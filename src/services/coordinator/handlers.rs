//! Scan and maintenance handlers for the Coordinator

use super::{Coordinator, CoreState, ScanDisposition};
use crate::domain::types::ScanEvent;
use crate::infra::metrics::Metrics;
use crate::services::open_house::{CloseReason, Transition};
use crate::services::scan_buffer::ScanMatches;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Pins a double tap's scans for the duration of its permission lookup, so a
/// racing consume stays visible after the lock is retaken.
///
/// Unpins on drop, including when the handler future is cancelled. Must be
/// dropped with the state lock released.
struct PinnedScans<'a> {
    state: &'a Mutex<CoreState>,
    ids: ScanMatches,
}

impl<'a> PinnedScans<'a> {
    fn new(state: &'a Mutex<CoreState>, core: &mut CoreState, ids: ScanMatches) -> Self {
        core.buffer.pin(&ids);
        Self { state, ids }
    }
}

impl Drop for PinnedScans<'_> {
    fn drop(&mut self) {
        self.state.lock().buffer.unpin(&self.ids);
    }
}

/// Update session counters and the active gauge. Called with the state lock
/// held so the gauge follows transition order.
fn record_transition(metrics: &Metrics, transition: &Transition) {
    match transition {
        Transition::Opened { .. } => metrics.record_session_opened(),
        Transition::Closed { reason: CloseReason::Toggled, .. } => metrics.record_session_closed(),
        Transition::Closed { reason: CloseReason::Expired, .. } => {
            metrics.record_session_expired()
        }
        Transition::NoWindow => metrics.record_no_window(),
    }
}

impl Coordinator {
    /// Process one scan.
    ///
    /// `now` is the facility-local time used for schedule resolution;
    /// correlation uses the scan's own timestamp.
    pub async fn handle_scan(&self, event: ScanEvent, now: NaiveDateTime) -> ScanDisposition {
        let process_start = Instant::now();
        let disposition = self.correlate(event, now).await;
        self.metrics.record_scan_processed(process_start.elapsed().as_micros() as u64);
        disposition
    }

    async fn correlate(&self, event: ScanEvent, now: NaiveDateTime) -> ScanDisposition {
        let Some(door) = self.doors.by_reader(event.device, event.location) else {
            debug!(
                identity = %event.identity,
                device = %event.device,
                location = %event.location,
                "scan_ignored_unmanaged_reader"
            );
            self.metrics.record_scan_ignored();
            return ScanDisposition::IgnoredReader;
        };

        let identity = event.identity;
        let (matches, current, _pinned) = {
            let mut state = self.state.lock();
            let matches = state.buffer.find_match(&event, self.scan_window);
            let current = state.buffer.record(event);
            self.metrics.set_scan_buffer_len(state.buffer.len());
            if matches.is_empty() {
                debug!(identity = %identity, door = %door.name, scan_id = %current, "scan_buffered");
                return ScanDisposition::NoMatch;
            }
            // Lets the second phase tell a racing consume from a tick eviction
            let mut held = matches.clone();
            held.push(current);
            let pinned = PinnedScans::new(&self.state, &mut state, held);
            (matches, current, pinned)
        };

        self.metrics.record_double_tap();
        let decision = self.gate.check(identity).await;
        if !decision.permitted {
            info!(
                identity = %identity,
                name = %decision.display_name,
                door = %door.name,
                "double_tap_not_permitted"
            );
            self.metrics.record_not_permitted();
            return ScanDisposition::NotPermitted;
        }

        let transition = {
            let mut state = self.state.lock();
            // A racing handler used this double tap if it consumed this scan
            // or every tap it pairs with. Taps the tick evicted still count.
            let used_elsewhere = state.buffer.was_consumed(current)
                || matches.iter().all(|id| state.buffer.was_consumed(*id));
            if used_elsewhere {
                debug!(identity = %identity, scan_id = %current, "double_tap_already_consumed");
                return ScanDisposition::AlreadyConsumed;
            }

            let mut used = matches;
            used.push(current);
            state.buffer.consume(&used);
            self.metrics.set_scan_buffer_len(state.buffer.len());

            let transition = state.machine.trigger(now, || self.schedule.resolve(now));
            self.dispatch(&transition);
            record_transition(&self.metrics, &transition);
            transition
        };

        match transition {
            Transition::Opened { session, duration } => {
                info!(
                    identity = %identity,
                    name = %decision.display_name,
                    door = %door.name,
                    window = %session.window.name,
                    session_id = %session.id,
                    duration_secs = %duration.num_seconds(),
                    "open_house_opened"
                );
                ScanDisposition::Opened
            }
            Transition::Closed { session, .. } => {
                info!(
                    identity = %identity,
                    name = %decision.display_name,
                    door = %door.name,
                    window = %session.window.name,
                    session_id = %session.id,
                    "open_house_closed"
                );
                ScanDisposition::Closed
            }
            Transition::NoWindow => {
                info!(
                    identity = %identity,
                    name = %decision.display_name,
                    door = %door.name,
                    "open_house_no_window"
                );
                ScanDisposition::NoWindow
            }
        }
    }

    /// One maintenance pass: evict stale scans, then expire the session if its
    /// window has ended. Returns the delay until the next pass.
    pub fn tick(&self, now: NaiveDateTime) -> Duration {
        self.metrics.record_maintenance_tick();

        let expired = {
            let mut state = self.state.lock();
            state.buffer.evict(now, self.scan_window);
            self.metrics.set_scan_buffer_len(state.buffer.len());

            let expired = state.machine.expire_if_due(now);
            if let Some(ref transition) = expired {
                self.dispatch(transition);
                record_transition(&self.metrics, transition);
            }
            expired
        };

        if let Some(Transition::Closed { session, reason: CloseReason::Expired }) = expired {
            info!(
                window = %session.window.name,
                session_id = %session.id,
                ends_at = %session.ends_at,
                "open_house_expired"
            );
        }

        self.maintenance_interval
    }

    /// Enqueue a transition's door commands. Called with the state lock held
    /// so commands reach the worker in transition order.
    fn dispatch(&self, transition: &Transition) {
        for cmd in transition.door_commands() {
            let door_id = cmd.door_id();
            let action = cmd.action();
            match self.door_tx.try_send(cmd) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(door_id = %door_id, action = %action, "door_cmd_queue_full");
                    self.metrics.record_door_cmd_dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    error!(door_id = %door_id, action = %action, "door_cmd_worker_gone");
                    self.metrics.record_door_cmd_dropped();
                }
            }
        }
    }
}
