//! Transport adapter contract.
//!
//! The link manager never talks to a Bluetooth stack directly. It drives an
//! implementation of [`Transport`], which hands out a [`Session`] per open
//! link. [`BleTransport`](crate::ble::BleTransport) is the btleplug-backed
//! implementation; tests and hosts with their own stack provide others.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::data::DeviceDescriptor;
use crate::error::Result;

/// Text encoding of records sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextEncoding {
    /// UTF-8 text.
    #[default]
    Utf8,
    /// 7-bit ASCII text.
    Ascii,
}

/// Options for opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Record delimiter the device terminates lines with.
    pub delimiter: u8,
    /// Text encoding of the byte stream.
    pub encoding: TextEncoding,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\n',
            encoding: TextEncoding::Utf8,
        }
    }
}

/// Capability interface over a platform Bluetooth stack.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether the adapter is present and powered.
    async fn is_enabled(&self) -> Result<bool>;

    /// Ask the platform to power the adapter on. Returns the resulting state.
    async fn request_enable(&self) -> Result<bool>;

    /// Ask for the permissions needed to scan and connect.
    async fn request_permissions(&self) -> Result<bool>;

    /// Devices the platform already trusts.
    async fn list_bonded(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Run one discovery pass and return what it saw.
    ///
    /// Implementations stop early once `cancel` fires.
    async fn discover(&self, cancel: CancellationToken) -> Result<Vec<DeviceDescriptor>>;

    /// Bond with the device. Returns whether the platform reports it bonded.
    async fn create_bond(&self, address: &str) -> Result<bool>;

    /// Open a byte-stream session to the device.
    ///
    /// Implementations must abandon the attempt once `cancel` fires and must
    /// not leave a half-open link behind.
    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Session>>;
}

/// An open byte-stream session to one device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Write raw bytes to the device.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Take the stream of incoming chunks.
    ///
    /// Returns `Some` once; the channel closes when the session ends.
    fn take_data(&self) -> Option<mpsc::Receiver<Bytes>>;

    /// Whether the link is still up.
    async fn is_connected(&self) -> Result<bool>;

    /// Close the session.
    async fn close(&self) -> Result<()>;
}
