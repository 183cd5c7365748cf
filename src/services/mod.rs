//! Services - business logic and state management
//!
//! - `coordinator` - Scan entry point and maintenance tick
//! - `scan_buffer` - Windowed double tap correlation
//! - `schedule` - Open house window resolution
//! - `authorization` - Fail-closed activation permission
//! - `open_house` - Toggle state machine
//! - `directory` - Person lookups
//! - `door` - Door actuators and the door directory
//! - `door_worker` - Async door command worker

pub mod authorization;
pub mod coordinator;
pub mod directory;
pub mod door;
pub mod door_worker;
pub mod open_house;
pub mod scan_buffer;
pub mod schedule;

// Re-export commonly used types
pub use authorization::{AuthorizationDecision, AuthorizationGate};
pub use coordinator::{Coordinator, ScanDisposition};
pub use directory::{IdentityDirectory, PersonRecord, StaticDirectory};
pub use door::{Door, DoorActuator, DoorDirectory, HttpDoorActuator, LogActuator};
pub use door_worker::{create_door_worker, DoorCmd, DoorCmdWorker};
pub use open_house::{CloseReason, OpenHouseStateMachine, Transition};
pub use scan_buffer::{ScanBuffer, ScanId};
pub use schedule::ScheduleResolver;
