//! Transport capability interface
//!
//! The radio backend is an external collaborator. The adapter only talks to
//! it through these two traits: [`Transport`] for the physical adapter and
//! [`DeviceLink`] for one connected peripheral.

use crate::domain::models::DeviceDescriptor;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::AddressType;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Transport-assigned reference to a characteristic on a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u16);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Invoked by the transport for every notification, on whatever thread or
/// task the backend delivers from.
pub type NotificationCallback = Arc<dyn Fn(Handle, &[u8]) + Send + Sync>;

/// The physical BLE adapter.
#[async_trait]
pub trait Transport: Send {
    type Link: DeviceLink;

    async fn start(&mut self) -> Result<(), TransportError>;
    async fn stop(&mut self) -> Result<(), TransportError>;

    /// `None` lets the backend pick its own scan window.
    async fn scan(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Vec<DeviceDescriptor>, TransportError>;

    async fn connect(
        &mut self,
        address: &str,
        timeout: Duration,
        address_type: AddressType,
    ) -> Result<Self::Link, TransportError>;
}

/// One connected peripheral.
#[async_trait]
pub trait DeviceLink: Send {
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Direct lookup of a characteristic, no discovery involved.
    async fn get_handle(&mut self, uuid: Uuid) -> Result<Handle, TransportError>;

    async fn discover_characteristics(&mut self) -> Result<Vec<Uuid>, TransportError>;

    async fn subscribe(
        &mut self,
        uuid: Uuid,
        callback: Option<NotificationCallback>,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, uuid: Uuid) -> Result<(), TransportError>;

    async fn get_rssi(&mut self) -> Result<i16, TransportError>;

    /// `true` once the peripheral or the OS has dropped the link.
    fn is_lost(&self) -> bool {
        false
    }
}
