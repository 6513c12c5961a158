//! Nordic UART Service profile
//!
//! Protocol constants for the UART-like GATT service exposed by nRF52-family
//! firmware. These must match the peripheral firmware exactly.

use crate::domain::models::Channel;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Nordic UART Service UUID
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// RX characteristic - the client writes here (client to device)
pub const NUS_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// TX characteristic - the device notifies here (device to client)
pub const NUS_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Link-layer address type used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Public => f.write_str("public"),
            AddressType::Random => f.write_str("random"),
        }
    }
}

/// nRF52 peripherals advertise a random static address.
pub const ADDRESS_TYPE: AddressType = AddressType::Random;

/// Upper bound for a transport-level connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Scan window used when a scan is triggered internally by name resolution.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed characteristic identifier for a logical channel.
pub fn channel_uuid(channel: Channel) -> Uuid {
    match channel {
        Channel::Tx => NUS_TX_CHAR_UUID,
        Channel::Rx => NUS_RX_CHAR_UUID,
    }
}
