// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # imu-telemetry-ble
//!
//! A Rust library for streaming live motion and temperature telemetry from
//! a microcontroller over a Bluetooth serial link.
//!
//! The device sends one text record per reading: gyroscope and
//! accelerometer vectors, a tilt pair, a stroke distance and a temperature.
//! This crate discovers and pairs with the device, keeps the link alive,
//! frames and decodes the byte stream, and republishes the latest reading to
//! any number of subscribers.
//!
//! ## Features
//!
//! - **Discovery**: bonded and nearby devices, deduplicated by address
//! - **Connection lifecycle**: pairing, connect timeout, liveness polling
//! - **Tolerant decoding**: `$key:value,...&` and JSON-per-line records,
//!   split across arbitrary chunk boundaries
//! - **Fan-out**: callback and broadcast subscribers for frames and states
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imu_telemetry_ble::{BleTransport, LinkConfig, LinkManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = BleTransport::new().await?;
//!     let manager = LinkManager::new(Arc::new(transport), LinkConfig::default())?;
//!     manager.initialize().await?;
//!
//!     let devices = manager.start_discovery().await?;
//!     let Some(device) = devices.first() else {
//!         return Ok(());
//!     };
//!
//!     let _frames = manager.on_data_received(|frame| {
//!         println!("accel |a| = {:.3} g, {:.1}°C", frame.accel().magnitude(), frame.temperature());
//!     });
//!
//!     manager.connect(device).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod hub;
pub mod link;
pub mod link_manager;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod transport;
pub mod utils;

// Re-exports for convenience
pub use ble::BleTransport;
pub use config::LinkConfig;
pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use hub::{HubStats, TelemetryHub};
pub use link::LinkLoss;
pub use link_manager::LinkManager;
pub use registry::DeviceRegistry;
pub use subscription::CallbackHandle;
pub use transport::{ConnectOptions, Session, TextEncoding, Transport};
pub use utils::{g_to_mps2, mps2_to_g, STANDARD_GRAVITY};

// Re-export commonly used types from submodules
pub use data::{DeviceDescriptor, SensorFrame, TelemetrySample, Tilt, Vector3};
pub use protocol::{FrameParser, ParserOptions};
