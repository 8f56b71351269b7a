//! BLE Service and Characteristic UUIDs.
//!
//! The device exposes its serial stream over the Nordic UART Service.

use uuid::Uuid;

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (write to device).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from device).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Check if a service UUID is the serial service.
pub fn is_uart_service(uuid: &Uuid) -> bool {
    *uuid == UART_SERVICE_UUID
}

/// Check if a characteristic UUID belongs to the serial service.
pub fn is_uart_characteristic(uuid: &Uuid) -> bool {
    *uuid == UART_RX_UUID || *uuid == UART_TX_UUID
}
