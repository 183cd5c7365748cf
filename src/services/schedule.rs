//! Open house schedule resolution
//!
//! Picks the open house window in effect at a given local time. Overlapping
//! windows are a misconfiguration, but resolution must still be deterministic:
//! the window ending first wins, then the lexically smallest name.

use crate::domain::types::OpenHouseWindow;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::warn;

pub struct ScheduleResolver {
    windows: Vec<Arc<OpenHouseWindow>>,
}

impl ScheduleResolver {
    pub fn new(windows: impl IntoIterator<Item = OpenHouseWindow>) -> Self {
        Self { windows: windows.into_iter().map(Arc::new).collect() }
    }

    /// The window in effect at `now`, if any
    pub fn resolve(&self, now: NaiveDateTime) -> Option<Arc<OpenHouseWindow>> {
        let matching: Vec<&Arc<OpenHouseWindow>> =
            self.windows.iter().filter(|w| w.contains(now)).collect();

        match matching.as_slice() {
            [] => None,
            [only] => Some(Arc::clone(only)),
            many => {
                let chosen = many
                    .iter()
                    .min_by(|a, b| a.end.cmp(&b.end).then_with(|| a.name.cmp(&b.name)))?;
                let overlapping: Vec<&str> = many.iter().map(|w| w.name.as_str()).collect();
                warn!(chosen = %chosen.name, overlapping = ?overlapping, "open_house_windows_overlap");
                Some(Arc::clone(chosen))
            }
        }
    }

    pub fn windows(&self) -> &[Arc<OpenHouseWindow>] {
        &self.windows
    }
}
