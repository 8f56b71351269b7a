//! Serial session over the Nordic UART Service.

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::uuids::{
    is_uart_characteristic, is_uart_service, UART_RX_UUID, UART_SERVICE_UUID, UART_TX_UUID,
};
use crate::error::{Error, Result};
use crate::transport::Session;

/// Buffered notification chunks per session.
const DATA_CHANNEL_CAPACITY: usize = 64;

/// An open UART session on a connected peripheral.
pub struct BleSession {
    /// The connected peripheral.
    peripheral: Peripheral,
    /// UART RX, written to send bytes.
    rx: Characteristic,
    /// UART TX, subscribed for incoming bytes.
    tx: Characteristic,
    /// Incoming chunks, until taken.
    data: Mutex<Option<mpsc::Receiver<Bytes>>>,
    /// Stops the notification forwarder.
    forwarder: CancellationToken,
}

impl BleSession {
    /// Subscribe to UART TX on a connected peripheral and start forwarding.
    ///
    /// Services must already be discovered.
    pub(crate) async fn open(peripheral: Peripheral) -> Result<Self> {
        if !peripheral
            .services()
            .iter()
            .any(|service| is_uart_service(&service.uuid))
        {
            return Err(Error::ConnectionFailed {
                reason: format!("device does not expose UART service {UART_SERVICE_UUID}"),
            });
        }

        let (rx, tx) = uart_characteristics(peripheral.characteristics())?;

        peripheral.subscribe(&tx).await.map_err(|e| {
            debug!("Failed to subscribe to {}: {:?}", UART_TX_UUID, e);
            Error::Bluetooth(e)
        })?;
        debug!("Subscribed to UART notifications");

        let mut notifications = peripheral.notifications().await?;
        let (data_tx, data_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let forwarder = CancellationToken::new();
        let stop = forwarder.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    notification = notifications.next() => match notification {
                        Some(notification) if notification.uuid == UART_TX_UUID => {
                            trace!("UART notification: {} bytes", notification.value.len());
                            if data_tx.send(Bytes::from(notification.value)).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("Notification stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            peripheral,
            rx,
            tx,
            data: Mutex::new(Some(data_rx)),
            forwarder,
        })
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl Session for BleSession {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let write_type = if self
            .rx
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        self.peripheral
            .write(&self.rx, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to UART RX", data.len());
        Ok(())
    }

    fn take_data(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.data.lock().take()
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn close(&self) -> Result<()> {
        self.forwarder.cancel();

        if let Err(e) = self.peripheral.unsubscribe(&self.tx).await {
            warn!("Failed to unsubscribe from UART TX: {}", e);
        }

        self.peripheral.disconnect().await.map_err(Error::Bluetooth)?;
        debug!("Disconnected from peripheral");
        Ok(())
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        self.forwarder.cancel();
    }
}

/// Pick UART RX and TX out of a peripheral's characteristics.
///
/// Only characteristics that belong to the UART service count.
fn uart_characteristics(
    all: impl IntoIterator<Item = Characteristic>,
) -> Result<(Characteristic, Characteristic)> {
    let uart: Vec<Characteristic> = all
        .into_iter()
        .filter(|c| is_uart_service(&c.service_uuid) && is_uart_characteristic(&c.uuid))
        .collect();

    let find = |uuid: Uuid| {
        uart.iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::ConnectionFailed {
                reason: format!("device does not expose UART characteristic {uuid}"),
            })
    };

    Ok((find(UART_RX_UUID)?, find(UART_TX_UUID)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn characteristic(service_uuid: Uuid, uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn test_uart_characteristics_found() {
        let battery = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
        let all = vec![
            characteristic(battery, Uuid::from_u128(0x2a19), CharPropFlags::READ),
            characteristic(UART_SERVICE_UUID, UART_TX_UUID, CharPropFlags::NOTIFY),
            characteristic(
                UART_SERVICE_UUID,
                UART_RX_UUID,
                CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
            ),
        ];

        let (rx, tx) = uart_characteristics(all).unwrap();
        assert_eq!(rx.uuid, UART_RX_UUID);
        assert!(rx.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE));
        assert_eq!(tx.uuid, UART_TX_UUID);
    }

    #[test]
    fn test_uart_uuid_under_other_service_ignored() {
        let other = Uuid::from_u128(0x1234);
        let all = vec![
            characteristic(other, UART_RX_UUID, CharPropFlags::WRITE),
            characteristic(UART_SERVICE_UUID, UART_TX_UUID, CharPropFlags::NOTIFY),
        ];

        let err = uart_characteristics(all).unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { ref reason } if reason.contains("6e400002")));
    }
}
