//! BLE communication module.
//!
//! This module provides the btleplug-backed [`Transport`](crate::Transport)
//! that streams telemetry over the Nordic UART Service.

pub mod session;
pub mod transport;
pub mod uuids;

pub use session::BleSession;
pub use transport::{BleTransport, DEFAULT_SCAN_DURATION};
pub use uuids::*;
