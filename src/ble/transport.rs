//! btleplug-backed transport.

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::session::BleSession;
use crate::data::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::transport::{ConnectOptions, Session, Transport};

/// How long one discovery pass scans by default.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// [`Transport`] over the first Bluetooth LE adapter.
pub struct BleTransport {
    /// The BLE adapter in use.
    adapter: Adapter,
    /// Length of one discovery pass.
    scan_duration: Duration,
}

impl BleTransport {
    /// Open the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_duration: DEFAULT_SCAN_DURATION,
        }
    }

    /// Set how long each discovery pass scans.
    pub fn with_scan_duration(mut self, scan_duration: Duration) -> Self {
        self.scan_duration = scan_duration;
        self
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral_address(&peripheral) == address {
                return Ok(peripheral);
            }
        }

        Err(Error::ConnectionFailed {
            reason: format!("device {address} has not been seen by the adapter"),
        })
    }

    async fn open_session(&self, peripheral: &Peripheral) -> Result<BleSession> {
        peripheral.discover_services().await?;
        BleSession::open(peripheral.clone()).await
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.adapter.adapter_info().await.is_ok())
    }

    async fn request_enable(&self) -> Result<bool> {
        // btleplug cannot power an adapter on; report what is there.
        self.is_enabled().await
    }

    async fn request_permissions(&self) -> Result<bool> {
        match self.adapter.peripherals().await {
            Ok(_) => Ok(true),
            Err(btleplug::Error::PermissionDenied) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_bonded(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut bonded = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.is_connected().await.unwrap_or(false) {
                bonded.push(describe(&peripheral, true).await);
            }
        }
        Ok(bonded)
    }

    async fn discover(&self, cancel: CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        info!("Scanning for {:?}", self.scan_duration);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        tokio::select! {
            _ = cancel.cancelled() => debug!("Scan cancelled"),
            _ = tokio::time::sleep(self.scan_duration) => {}
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let bonded = peripheral.is_connected().await.unwrap_or(false);
            devices.push(describe(&peripheral, bonded).await);
        }
        debug!("Scan saw {} peripheral(s)", devices.len());
        Ok(devices)
    }

    async fn create_bond(&self, address: &str) -> Result<bool> {
        // BLE bonds on demand when an encrypted characteristic is accessed.
        debug!("No explicit bonding for {}", address);
        Ok(true)
    }

    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Session>> {
        debug!("Opening UART session to {} with {:?}", address, options);
        let peripheral = self.find_peripheral(address).await?;

        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = peripheral.connect() => Some(result),
        };

        match connected {
            Some(Ok(())) if !cancel.is_cancelled() => {}
            Some(Err(e)) => return Err(e.into()),
            _ => {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to disconnect after cancelled connect: {}", e);
                }
                return Err(Error::Cancelled);
            }
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            opened = self.open_session(&peripheral) => opened,
        };

        match opened {
            Ok(session) => {
                info!("UART session open to {}", address);
                Ok(Box::new(session))
            }
            Err(e) => {
                if let Err(close_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect after setup error: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// Stable address for a peripheral.
///
/// Some platforms hide the hardware address; the platform id stands in.
fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

async fn describe(peripheral: &Peripheral, bonded: bool) -> DeviceDescriptor {
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|properties| properties.local_name);

    DeviceDescriptor::new(peripheral_address(peripheral), name, bonded)
}
