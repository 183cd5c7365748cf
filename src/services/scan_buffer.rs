//! Rolling buffer of recent card scans for double tap correlation
//!
//! Holds scans for a short window so a second tap by the same card at the
//! same reader can be matched with the first. Matched scans are consumed so a
//! third tap cannot pair with a tap that already triggered something.
//!
//! Scans a handler is still deciding on can be pinned. While pinned, the
//! buffer remembers whether a scan left through `consume` rather than
//! `evict`, so the handler can tell a used double tap from an aged-out one.

use crate::domain::types::ScanEvent;
use chrono::NaiveDateTime;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Sequence number assigned to a scan when it enters the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub u64);

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prior scans correlated with a new one, in insertion order
pub type ScanMatches = SmallVec<[ScanId; 2]>;

#[derive(Debug, Clone)]
struct BufferedScan {
    id: ScanId,
    event: ScanEvent,
}

/// `at - window`, saturating at the earliest representable time
#[inline]
fn window_start(at: NaiveDateTime, window: Duration) -> NaiveDateTime {
    chrono::TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Recent scans, oldest first
#[derive(Debug, Default)]
pub struct ScanBuffer {
    scans: VecDeque<BufferedScan>,
    next_id: u64,
    /// Pin count per scan; several handlers may hold the same scan
    pinned: FxHashMap<ScanId, u32>,
    /// Pinned scans removed by `consume`
    consumed: FxHashSet<ScanId>,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self {
            scans: VecDeque::new(),
            next_id: 0,
            pinned: FxHashMap::default(),
            consumed: FxHashSet::default(),
        }
    }

    /// Append a scan. No dedup happens here.
    pub fn record(&mut self, event: ScanEvent) -> ScanId {
        let id = ScanId(self.next_id);
        self.next_id += 1;
        self.scans.push_back(BufferedScan { id, event });
        id
    }

    /// Prior scans by the same identity at the same reader no older than
    /// `event.scan_time - window`.
    ///
    /// Called before the event itself is recorded, so the event never matches
    /// itself.
    pub fn find_match(&self, event: &ScanEvent, window: Duration) -> ScanMatches {
        let earliest = window_start(event.scan_time, window);
        self.scans
            .iter()
            .filter(|s| s.event.same_reader_and_identity(event) && s.event.scan_time >= earliest)
            .map(|s| s.id)
            .collect()
    }

    /// Remove the given scans; returns how many were still present
    pub fn consume(&mut self, ids: &[ScanId]) -> usize {
        for id in ids {
            if self.pinned.contains_key(id) {
                self.consumed.insert(*id);
            }
        }
        let before = self.scans.len();
        self.scans.retain(|s| !ids.contains(&s.id));
        before - self.scans.len()
    }

    /// Track whether these scans get consumed until they are unpinned
    pub fn pin(&mut self, ids: &[ScanId]) {
        for id in ids {
            *self.pinned.entry(*id).or_insert(0) += 1;
        }
    }

    pub fn unpin(&mut self, ids: &[ScanId]) {
        for id in ids {
            if let Some(count) = self.pinned.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    self.pinned.remove(id);
                    self.consumed.remove(id);
                }
            }
        }
    }

    /// Whether a pinned scan was removed by `consume`. Always false for scans
    /// that are not pinned.
    pub fn was_consumed(&self, id: ScanId) -> bool {
        self.consumed.contains(&id)
    }

    /// Drop every scan older than `now - window`; returns how many were dropped
    pub fn evict(&mut self, now: NaiveDateTime, window: Duration) -> usize {
        let cutoff = window_start(now, window);
        let before = self.scans.len();
        self.scans.retain(|s| s.event.scan_time >= cutoff);
        let evicted = before - self.scans.len();
        if evicted > 0 {
            debug!(evicted = %evicted, remaining = %self.scans.len(), "scan_buffer_evicted");
        }
        evicted
    }

    pub fn contains(&self, id: ScanId) -> bool {
        self.scans.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}
