//! Error types for the imu-telemetry-ble crate.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available, unsupported, or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The user or the OS refused the Bluetooth permissions.
    #[error("Bluetooth permissions were not granted")]
    PermissionDenied,

    /// A discovery pass is already running.
    #[error("Device discovery is already in progress")]
    DiscoveryInProgress,

    /// The discovery pass failed.
    #[error("Device discovery failed: {reason}")]
    DiscoveryFailed {
        /// Description of why discovery failed.
        reason: String,
    },

    /// Bonding with the device failed or was refused.
    #[error("Pairing with {address} failed: {reason}")]
    PairingFailed {
        /// Address of the device.
        address: String,
        /// Description of why pairing failed.
        reason: String,
    },

    /// A connection attempt is already in flight.
    #[error("A connection attempt is already in progress")]
    ConnectionInProgress,

    /// The transport did not open the link in time.
    #[error("Connection timed out after {timeout:?}")]
    ConnectionTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A single record could not be decoded.
    #[error("Invalid telemetry record: {context}")]
    DecodeError {
        /// Description of what was invalid about the record.
        context: String,
    },

    /// The liveness poll found the session dead.
    #[error("Liveness check failed: {reason}")]
    LivenessCheckFailed {
        /// Description of the failed check.
        reason: String,
    },

    /// The operation was cancelled by a disconnect or shutdown.
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation requires a connection but no device is connected.
    #[error("Device not connected")]
    NotConnected,

    /// The request is not valid in the current connection state.
    #[error("Operation not allowed while {state}")]
    InvalidState {
        /// The state the link was in.
        state: ConnectionState,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::DecodeError`] from anything printable.
    pub(crate) fn decode(context: impl Into<String>) -> Self {
        Self::DecodeError {
            context: context.into(),
        }
    }

    /// Whether retrying the same request right away can succeed.
    ///
    /// Adapter and permission failures need user action first; in-progress
    /// conditions clear once the running operation settles.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::PairingFailed { .. }
                | Self::Cancelled
                | Self::Bluetooth(_)
        )
    }

    /// Map a transport-level connect error onto the connection taxonomy.
    ///
    /// Errors that already name a specific condition pass through unchanged.
    pub(crate) fn into_connect_failure(self) -> Self {
        match self {
            Self::BluetoothUnavailable
            | Self::PermissionDenied
            | Self::Cancelled
            | Self::ConnectionTimeout { .. }
            | Self::ConnectionFailed { .. } => self,
            other => Self::ConnectionFailed {
                reason: other.to_string(),
            },
        }
    }

    /// Map a transport-level discovery error onto the discovery taxonomy.
    pub(crate) fn into_discovery_failure(self) -> Self {
        match self {
            Self::BluetoothUnavailable
            | Self::PermissionDenied
            | Self::Cancelled
            | Self::DiscoveryFailed { .. } => self,
            other => Self::DiscoveryFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
