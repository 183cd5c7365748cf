//! Domain models - core business types and session model
//!
//! This module contains the canonical data types used throughout the system:
//! - `ScanEvent` - a card scan reported by a reader
//! - `OpenHouseWindow` - a scheduled period in which open house may start
//! - `ActiveSession` / `OpenHouseState` - the toggle state of open house mode
//! - Newtype IDs for identities, readers and doors

pub mod session;
pub mod types;

// Re-export commonly used types at module level
pub use session::{ActiveSession, OpenHouseState};
pub use types::{
    DeviceId, DoorId, IdentityId, LocationId, OpenHouseWindow, ScanEvent, ScanOutcome,
    ScanParseError,
};
