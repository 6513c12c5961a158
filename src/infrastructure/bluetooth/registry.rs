//! Characteristic Registry
//!
//! Maps device names to addresses and logical channels to transport handles,
//! with a memoized characteristic discovery used for subscribe diagnostics.

use crate::domain::models::{Channel, DeviceDescriptor};
use crate::error::{TransportError, UartError};
use crate::infrastructure::bluetooth::protocol::channel_uuid;
use crate::infrastructure::bluetooth::transport::{DeviceLink, Handle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// First exact name match wins.
pub fn resolve_address(devices: &[DeviceDescriptor], name: &str) -> Result<String, UartError> {
    match devices.iter().find(|device| device.name == name) {
        Some(device) => {
            info!("Found {} at address {}", name, device.address);
            Ok(device.address.clone())
        }
        None => Err(UartError::DeviceNotFound {
            name: name.to_string(),
        }),
    }
}

/// Handles for both channels, resolved once per connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelHandles {
    tx: Option<Handle>,
    rx: Option<Handle>,
}

impl ChannelHandles {
    /// Fast-path lookup of both channels. A failed lookup leaves that
    /// channel unresolved; subscribe-time discovery decides whether it exists.
    pub async fn resolve<L: DeviceLink>(link: &mut L) -> Self {
        let mut handles = Self::default();
        for channel in Channel::ALL {
            match link.get_handle(channel_uuid(channel)).await {
                Ok(handle) => {
                    debug!("Resolved {} to handle {}", channel, handle);
                    handles.set(channel, Some(handle));
                }
                Err(e) => warn!("Could not resolve handle for {} - {}", channel, e),
            }
        }
        handles
    }

    pub fn get(&self, channel: Channel) -> Option<Handle> {
        match channel {
            Channel::Tx => self.tx,
            Channel::Rx => self.rx,
        }
    }

    fn set(&mut self, channel: Channel, handle: Option<Handle>) {
        match channel {
            Channel::Tx => self.tx = handle,
            Channel::Rx => self.rx = handle,
        }
    }
}

/// Characteristic identifiers of the connected device, discovered at most
/// once per connection.
#[derive(Debug, Clone, Default)]
pub struct CharacteristicCache {
    discovered: Option<Vec<Uuid>>,
}

impl CharacteristicCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.discovered.is_some()
    }

    pub async fn discover<L: DeviceLink>(
        &mut self,
        link: &mut L,
    ) -> Result<&[Uuid], TransportError> {
        if self.discovered.is_none() {
            let uuids = link.discover_characteristics().await?;
            debug!("Discovered {} device characteristics", uuids.len());
            self.discovered = Some(uuids);
        }
        Ok(self.discovered.as_deref().unwrap_or_default())
    }

    /// `None` when discovery itself failed.
    pub async fn contains<L: DeviceLink>(&mut self, link: &mut L, uuid: Uuid) -> Option<bool> {
        match self.discover(link).await {
            Ok(uuids) => Some(uuids.contains(&uuid)),
            Err(e) => {
                warn!("Characteristic discovery failed - {}", e);
                None
            }
        }
    }
}
