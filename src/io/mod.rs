//! IO modules - external system interfaces
//!
//! - `scan_listener` - TCP listener for card reader scans
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod prometheus;
pub mod scan_listener;

// Re-export commonly used types
pub use prometheus::start_metrics_server;
pub use scan_listener::{parse_scan_line, serve_scan_listener, start_scan_listener, ScanListenerConfig};
