//! Open house session model

use crate::domain::types::OpenHouseWindow;
use chrono::NaiveDateTime;
use std::sync::Arc;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// The runtime record of the open house currently in effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Log correlation ID
    pub id: String,
    pub window: Arc<OpenHouseWindow>,
    pub started_at: NaiveDateTime,
    /// Today's date combined with the window end time
    pub ends_at: NaiveDateTime,
}

impl ActiveSession {
    pub fn new(window: Arc<OpenHouseWindow>, now: NaiveDateTime) -> Self {
        let ends_at = now.date().and_time(window.end);
        Self { id: new_uuid_v7(), window, started_at: now, ends_at }
    }

    /// Natural expiry is strictly after the end timestamp
    #[inline]
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        now > self.ends_at
    }
}

/// Open house mode: either nothing is active or exactly one session is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OpenHouseState {
    #[default]
    Idle,
    Active(ActiveSession),
}

impl OpenHouseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenHouseState::Idle => "idle",
            OpenHouseState::Active(_) => "active",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OpenHouseState::Active(_))
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        match self {
            OpenHouseState::Idle => None,
            OpenHouseState::Active(session) => Some(session),
        }
    }
}
