//! Data structures for telemetry and devices.
//!
//! This module contains the decoded sensor frame types and the descriptors
//! produced by device discovery.

pub mod device;
pub mod frame;

pub use device::DeviceDescriptor;
pub use frame::{SensorFrame, TelemetrySample, Tilt, Vector3};
