//! Open house toggle state machine
//!
//! `Idle --trigger--> Active --trigger--> Idle`, plus `Active --expire--> Idle`
//! driven by the maintenance tick. The machine never performs I/O; it hands
//! back a `Transition` describing which doors to open or revert.

use crate::domain::session::{ActiveSession, OpenHouseState};
use crate::domain::types::OpenHouseWindow;
use crate::services::door_worker::DoorCmd;
use chrono::{NaiveDateTime, TimeDelta};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// An authorized double tap while active
    Toggled,
    /// The maintenance tick saw the window end pass
    Expired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Toggled => "toggled",
            CloseReason::Expired => "expired",
        }
    }
}

/// What a trigger or expiry did to the state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> Active; doors unlock for `duration`
    Opened { session: ActiveSession, duration: TimeDelta },
    /// Active -> Idle; the closed session's doors revert
    Closed { session: ActiveSession, reason: CloseReason },
    /// Idle trigger with no window in effect; nothing changed
    NoWindow,
}

impl Transition {
    /// Door commands needed to carry out this transition, in window door order
    pub fn door_commands(&self) -> Vec<DoorCmd> {
        let enqueued_at = Instant::now();
        match self {
            Transition::Opened { session, duration } => {
                // Doors take whole seconds; under one second left means the
                // window has as good as ended
                let open_for = duration.to_std().ok().filter(|d| d.as_secs() > 0);
                session
                    .window
                    .door_ids
                    .iter()
                    .map(|&door_id| match open_for {
                        Some(duration) => DoorCmd::Open { door_id, duration, enqueued_at },
                        None => DoorCmd::Revert { door_id, enqueued_at },
                    })
                    .collect()
            }
            Transition::Closed { session, .. } => session
                .window
                .door_ids
                .iter()
                .map(|&door_id| DoorCmd::Revert { door_id, enqueued_at })
                .collect(),
            Transition::NoWindow => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct OpenHouseStateMachine {
    state: OpenHouseState,
}

impl OpenHouseStateMachine {
    pub fn new() -> Self {
        Self { state: OpenHouseState::Idle }
    }

    pub fn state(&self) -> &OpenHouseState {
        &self.state
    }

    /// Apply an authorized double tap.
    ///
    /// `resolve` is only consulted when idle; closing never depends on the
    /// schedule.
    pub fn trigger<F>(&mut self, now: NaiveDateTime, resolve: F) -> Transition
    where
        F: FnOnce() -> Option<Arc<OpenHouseWindow>>,
    {
        match std::mem::take(&mut self.state) {
            OpenHouseState::Active(session) => {
                info!(
                    session_id = %session.id,
                    window = %session.window.name,
                    ends_at = %session.ends_at,
                    "open_house_session_toggled_off"
                );
                Transition::Closed { session, reason: CloseReason::Toggled }
            }
            OpenHouseState::Idle => {
                let Some(window) = resolve() else {
                    return Transition::NoWindow;
                };
                let session = ActiveSession::new(window, now);
                let duration = session.ends_at - now;
                info!(
                    session_id = %session.id,
                    window = %session.window.name,
                    ends_at = %session.ends_at,
                    duration_secs = %duration.num_seconds(),
                    "open_house_session_started"
                );
                self.state = OpenHouseState::Active(session.clone());
                Transition::Opened { session, duration }
            }
        }
    }

    /// Close the session if `now` is past its end
    pub fn expire_if_due(&mut self, now: NaiveDateTime) -> Option<Transition> {
        match &self.state {
            OpenHouseState::Active(session) if session.is_expired(now) => {}
            _ => return None,
        }
        let OpenHouseState::Active(session) = std::mem::take(&mut self.state) else {
            return None;
        };
        info!(
            session_id = %session.id,
            window = %session.window.name,
            ends_at = %session.ends_at,
            "open_house_session_expired"
        );
        Some(Transition::Closed { session, reason: CloseReason::Expired })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DoorId;
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use std::time::Duration;

    fn window(name: &str, doors: &[i32]) -> Arc<OpenHouseWindow> {
        Arc::new(OpenHouseWindow {
            name: name.to_string(),
            day_of_week: Weekday::Sat,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            door_ids: doors.iter().copied().map(DoorId).collect(),
        })
    }

    fn saturday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_idle_trigger_opens() {
        let mut machine = OpenHouseStateMachine::new();
        let w = window("saturday-am", &[7]);

        let transition = machine.trigger(saturday(10, 0, 0), || Some(w.clone()));

        let Transition::Opened { session, duration } = &transition else {
            panic!("expected open, got {transition:?}");
        };
        assert_eq!(*duration, TimeDelta::hours(2));
        assert_eq!(session.ends_at, saturday(12, 0, 0));
        assert!(machine.state().is_active());

        let cmds = transition.door_commands();
        assert_eq!(cmds.len(), 1);
        assert!(matches!(
            cmds[0],
            DoorCmd::Open { door_id: DoorId(7), duration, .. } if duration == Duration::from_secs(7200)
        ));
    }

    #[test]
    fn test_idle_trigger_without_window_stays_idle() {
        let mut machine = OpenHouseStateMachine::new();

        let transition = machine.trigger(saturday(13, 0, 0), || None);

        assert_eq!(transition, Transition::NoWindow);
        assert!(transition.door_commands().is_empty());
        assert!(!machine.state().is_active());
    }

    #[test]
    fn test_active_trigger_closes_without_resolving() {
        let mut machine = OpenHouseStateMachine::new();
        let w = window("saturday-am", &[7, 8]);
        machine.trigger(saturday(10, 0, 0), || Some(w.clone()));

        let transition =
            machine.trigger(saturday(10, 30, 0), || panic!("close must not consult the schedule"));

        let Transition::Closed { session, reason } = &transition else {
            panic!("expected close, got {transition:?}");
        };
        assert_eq!(*reason, CloseReason::Toggled);
        assert_eq!(session.window.name, "saturday-am");
        assert!(!machine.state().is_active());

        let reverted: Vec<DoorId> = transition
            .door_commands()
            .iter()
            .map(|cmd| match cmd {
                DoorCmd::Revert { door_id, .. } => *door_id,
                other => panic!("expected revert, got {other:?}"),
            })
            .collect();
        assert_eq!(reverted, vec![DoorId(7), DoorId(8)]);
    }

    #[test]
    fn test_close_uses_previous_window_doors() {
        let mut machine = OpenHouseStateMachine::new();
        let first = window("first", &[1, 2]);
        machine.trigger(saturday(10, 0, 0), || Some(first.clone()));

        // A different window would resolve now, but the close reverts the first one's doors
        let transition = machine.trigger(saturday(11, 0, 0), || Some(window("second", &[3])));

        let doors: Vec<DoorId> =
            transition.door_commands().iter().map(DoorCmd::door_id).collect();
        assert_eq!(doors, vec![DoorId(1), DoorId(2)]);
    }

    #[test]
    fn test_toggle_cycle() {
        let mut machine = OpenHouseStateMachine::new();
        let w = window("saturday-am", &[7]);

        assert!(matches!(
            machine.trigger(saturday(10, 0, 0), || Some(w.clone())),
            Transition::Opened { .. }
        ));
        assert!(matches!(
            machine.trigger(saturday(10, 5, 0), || Some(w.clone())),
            Transition::Closed { reason: CloseReason::Toggled, .. }
        ));
        assert!(matches!(
            machine.trigger(saturday(10, 10, 0), || Some(w.clone())),
            Transition::Opened { .. }
        ));
    }

    #[test]
    fn test_expire_only_after_end() {
        let mut machine = OpenHouseStateMachine::new();
        let w = window("saturday-am", &[7]);
        machine.trigger(saturday(10, 0, 0), || Some(w.clone()));

        assert!(machine.expire_if_due(saturday(11, 59, 59)).is_none());
        assert!(machine.expire_if_due(saturday(12, 0, 0)).is_none());

        let transition = machine.expire_if_due(saturday(12, 0, 1)).unwrap();
        assert!(matches!(transition, Transition::Closed { reason: CloseReason::Expired, .. }));
        assert!(!machine.state().is_active());

        // Nothing left to expire
        assert!(machine.expire_if_due(saturday(12, 5, 0)).is_none());
    }

    #[test]
    fn test_expire_when_idle_is_noop() {
        let mut machine = OpenHouseStateMachine::new();
        assert!(machine.expire_if_due(saturday(23, 0, 0)).is_none());
    }

    #[test]
    fn test_non_positive_duration_reverts() {
        let session = ActiveSession::new(window("saturday-am", &[7]), saturday(12, 0, 0));
        let transition = Transition::Opened { session, duration: TimeDelta::zero() };

        let cmds = transition.door_commands();
        assert!(matches!(cmds[0], DoorCmd::Revert { door_id: DoorId(7), .. }));
    }

    #[test]
    fn test_sub_second_duration_reverts() {
        let session = ActiveSession::new(window("saturday-am", &[7]), saturday(12, 0, 0));
        let transition =
            Transition::Opened { session, duration: TimeDelta::milliseconds(400) };

        let cmds = transition.door_commands();
        assert!(matches!(cmds[0], DoorCmd::Revert { door_id: DoorId(7), .. }));
    }
}
