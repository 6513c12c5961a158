//! Transport backed by `btleplug`
//!
//! Drives the host's Bluetooth adapter through the platform stack (BlueZ,
//! CoreBluetooth, WinRT). btleplug does not expose ATT handles, so handles
//! are ordinals over the discovered characteristic set.

use crate::domain::models::DeviceDescriptor;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::AddressType;
use crate::infrastructure::bluetooth::transport::{
    DeviceLink, Handle, NotificationCallback, Transport,
};
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scan window when the caller does not bound the scan.
pub const BACKEND_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Reported when the platform has no signal strength for a device.
pub const RSSI_UNAVAILABLE: i16 = 127;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type CallbackMap = Arc<Mutex<HashMap<Uuid, NotificationCallback>>>;

/// Host Bluetooth adapter.
pub struct BtleplugTransport {
    adapter_index: usize,
    manager: Option<Manager>,
    adapter: Option<Adapter>,
    // Links handed out since start; released on stop.
    connected: Vec<Peripheral>,
}

impl BtleplugTransport {
    /// Use the first adapter the platform reports.
    pub fn new() -> Self {
        Self::with_adapter_index(0)
    }

    pub fn with_adapter_index(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            manager: None,
            adapter: None,
            connected: Vec::new(),
        }
    }

    pub fn adapter_index(&self) -> usize {
        self.adapter_index
    }

    fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.adapter.as_ref().ok_or(TransportError::NotStarted)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in self.adapter()?.peripherals().await? {
            if matches_address(&peripheral, address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Known peripherals first; otherwise scan until it shows up or `window`
    /// runs out.
    async fn locate(&self, address: &str, window: Duration) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.find_peripheral(address).await? {
            return Ok(peripheral);
        }

        let adapter = self.adapter()?;
        debug!("{} not known yet, scanning for it", address);
        adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + window;
        let found = loop {
            if let Some(peripheral) = self.find_peripheral(address).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(POLL_INTERVAL).await;
        };
        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan cleanly - {}", e);
        }
        found.ok_or_else(|| TransportError::DeviceUnknown(address.to_string()))
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

fn characteristic_handles(peripheral: &Peripheral) -> HashMap<Uuid, Handle> {
    peripheral
        .characteristics()
        .iter()
        .enumerate()
        .map(|(index, c)| (c.uuid, Handle(index as u16 + 1)))
        .collect()
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Link = BtleplugLink;

    async fn start(&mut self) -> Result<(), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(self.adapter_index)
            .ok_or(TransportError::NoAdapter)?;
        match adapter.adapter_info().await {
            Ok(name) => info!("Using Bluetooth adapter {}", name),
            Err(e) => debug!("Adapter info unavailable - {}", e),
        }
        self.manager = Some(manager);
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        for peripheral in self.connected.drain(..) {
            match peripheral.is_connected().await {
                Ok(true) => {
                    if let Err(e) = peripheral.disconnect().await {
                        warn!("Failed to release {} - {}", peripheral.address(), e);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("Could not query {} - {}", peripheral.address(), e),
            }
        }
        if let Some(adapter) = self.adapter.take() {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan cleanly - {}", e);
            }
        }
        self.manager = None;
        Ok(())
    }

    async fn scan(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let adapter = self.adapter()?;
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(timeout.unwrap_or(BACKEND_SCAN_WINDOW)).await;
        adapter.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            devices.push(DeviceDescriptor {
                name: properties.local_name.unwrap_or_default(),
                address: peripheral.address().to_string(),
                rssi: properties.rssi.unwrap_or(RSSI_UNAVAILABLE),
            });
        }
        Ok(devices)
    }

    async fn connect(
        &mut self,
        address: &str,
        connect_timeout: Duration,
        address_type: AddressType,
    ) -> Result<BtleplugLink, TransportError> {
        // The platform stack resolves the address type itself.
        debug!("Connecting to {} ({} address)", address, address_type);
        let peripheral = self.locate(address, connect_timeout).await?;

        if !peripheral.is_connected().await? {
            timeout(connect_timeout, peripheral.connect())
                .await
                .map_err(|_| TransportError::Timeout(connect_timeout))??;
        }
        // Tracked before setup so a failed setup is still released on stop.
        self.connected.retain(|p| p.id() != peripheral.id());
        self.connected.push(peripheral.clone());
        peripheral.discover_services().await?;

        let handles = characteristic_handles(&peripheral);
        let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
        let mut stream = peripheral.notifications().await?;
        let pump_callbacks = callbacks.clone();
        let pump_handles = handles.clone();
        let lost = Arc::new(AtomicBool::new(false));
        let pump_lost = lost.clone();
        let pump = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let callback = pump_callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&notification.uuid)
                    .cloned();
                let handle = pump_handles.get(&notification.uuid).copied();
                if let (Some(callback), Some(handle)) = (callback, handle) {
                    callback(handle, &notification.value);
                }
            }
            debug!("Notification stream ended");
            pump_lost.store(true, Ordering::Release);
        });

        Ok(BtleplugLink {
            peripheral,
            handles,
            callbacks,
            pump,
            lost,
        })
    }
}

/// Connected btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    handles: HashMap<Uuid, Handle>,
    callbacks: CallbackMap,
    pump: JoinHandle<()>,
    lost: Arc<AtomicBool>,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn callbacks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, NotificationCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeviceLink for BtleplugLink {
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.pump.abort();
        self.callbacks().clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn get_handle(&mut self, uuid: Uuid) -> Result<Handle, TransportError> {
        self.handles
            .get(&uuid)
            .copied()
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    async fn discover_characteristics(&mut self) -> Result<Vec<Uuid>, TransportError> {
        self.peripheral.discover_services().await?;
        self.handles = characteristic_handles(&self.peripheral);
        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| c.uuid)
            .collect())
    }

    async fn subscribe(
        &mut self,
        uuid: Uuid,
        callback: Option<NotificationCallback>,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.subscribe(&characteristic).await?;
        if let Some(callback) = callback {
            self.callbacks().insert(uuid, callback);
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, uuid: Uuid) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        // Keep delivering until the peripheral has really stopped notifying.
        self.callbacks().remove(&uuid);
        Ok(())
    }

    async fn get_rssi(&mut self) -> Result<i16, TransportError> {
        self.peripheral
            .properties()
            .await?
            .and_then(|properties| properties.rssi)
            .ok_or_else(|| TransportError::Backend("rssi unavailable".to_string()))
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        if !self.pump.is_finished() {
            warn!("Dropping BLE link with notification pump still running");
            self.pump.abort();
        }
    }
}
