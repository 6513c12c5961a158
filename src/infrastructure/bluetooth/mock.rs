//! In-memory transport
//!
//! A scriptable stand-in for the radio backend. The transport and every link
//! it hands out share one [`MockState`]; keep a clone of it (via
//! [`MockTransport::state`]) to script failures, inject notifications from any
//! thread, and inspect the calls made after the transport has been moved into
//! an adapter.

use crate::domain::models::DeviceDescriptor;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{
    AddressType, NUS_RX_CHAR_UUID, NUS_SERVICE_UUID, NUS_TX_CHAR_UUID,
};
use crate::infrastructure::bluetooth::transport::{
    DeviceLink, Handle, NotificationCallback, Transport,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Counters for the calls a test may want to assert on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub starts: usize,
    pub stops: usize,
    pub scans: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub discoveries: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
}

#[derive(Default)]
struct Inner {
    started: bool,
    devices: Vec<DeviceDescriptor>,
    characteristics: Vec<Uuid>,
    rssi: i16,
    last_scan_timeout: Option<Option<Duration>>,
    connected_address: Option<String>,
    last_address_type: Option<AddressType>,
    connect_delay: Option<Duration>,
    fail_start: bool,
    fail_scan: bool,
    fail_connect: bool,
    fail_discovery: bool,
    fail_rssi: bool,
    fail_unsubscribe: bool,
    link_lost: bool,
    fail_subscribe: HashSet<Uuid>,
    subscriptions: HashMap<Uuid, Option<NotificationCallback>>,
    calls: MockCalls,
}

/// Shared, clonable view onto the mock radio.
#[derive(Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.lock().devices = devices;
    }

    pub fn set_characteristics(&self, characteristics: Vec<Uuid>) {
        self.lock().characteristics = characteristics;
    }

    pub fn set_rssi(&self, rssi: i16) {
        self.lock().rssi = rssi;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.lock().fail_discovery = fail;
    }

    pub fn fail_rssi(&self, fail: bool) {
        self.lock().fail_rssi = fail;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.lock().fail_unsubscribe = fail;
    }

    /// Make subscribe fail for `uuid` even though the characteristic may exist.
    pub fn fail_subscribe(&self, uuid: Uuid) {
        self.lock().fail_subscribe.insert(uuid);
    }

    /// Drop the link from the peripheral side, as on a power-off.
    pub fn drop_link(&self) {
        let mut inner = self.lock();
        inner.link_lost = true;
        inner.connected_address = None;
        inner.subscriptions.clear();
    }

    pub fn calls(&self) -> MockCalls {
        self.lock().calls
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    pub fn last_address_type(&self) -> Option<AddressType> {
        self.lock().last_address_type
    }

    /// Timeout passed to the most recent scan, if any scan ran.
    pub fn last_scan_timeout(&self) -> Option<Option<Duration>> {
        self.lock().last_scan_timeout
    }

    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.lock().subscriptions.contains_key(&uuid)
    }

    /// Deliver a notification as the peripheral would. Returns `false` when
    /// nothing is subscribed with a callback for `uuid`.
    pub fn notify(&self, uuid: Uuid, data: &[u8]) -> bool {
        let (callback, handle) = {
            let inner = self.lock();
            let callback = inner.subscriptions.get(&uuid).cloned().flatten();
            (callback, handle_for(&inner.characteristics, uuid))
        };
        match (callback, handle) {
            (Some(callback), Some(handle)) => {
                callback(handle, data);
                true
            }
            _ => false,
        }
    }
}

fn handle_for(characteristics: &[Uuid], uuid: Uuid) -> Option<Handle> {
    characteristics
        .iter()
        .position(|c| *c == uuid)
        .map(|index| Handle(0x000e + 2 * index as u16))
}

/// Mock BLE adapter.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: MockState,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `Nordic_UART` peripheral exposing both UART characteristics.
    pub fn nordic_uart() -> Self {
        let transport = Self::new();
        transport.state.set_devices(vec![DeviceDescriptor::new(
            "Nordic_UART",
            "AA:BB:CC:DD:EE:FF",
            -60,
        )]);
        transport.state.set_characteristics(vec![
            NUS_SERVICE_UUID,
            NUS_RX_CHAR_UUID,
            NUS_TX_CHAR_UUID,
        ]);
        transport.state.set_rssi(-60);
        transport
    }

    pub fn state(&self) -> MockState {
        self.state.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn start(&mut self) -> Result<(), TransportError> {
        let mut inner = self.state.lock();
        inner.calls.starts += 1;
        if inner.fail_start {
            return Err(TransportError::NoAdapter);
        }
        inner.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        let mut inner = self.state.lock();
        inner.calls.stops += 1;
        inner.started = false;
        inner.connected_address = None;
        inner.subscriptions.clear();
        Ok(())
    }

    async fn scan(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut inner = self.state.lock();
        inner.calls.scans += 1;
        inner.last_scan_timeout = Some(timeout);
        if !inner.started {
            return Err(TransportError::NotStarted);
        }
        if inner.fail_scan {
            return Err(TransportError::Backend("scan aborted".to_string()));
        }
        Ok(inner.devices.clone())
    }

    async fn connect(
        &mut self,
        address: &str,
        _timeout: Duration,
        address_type: AddressType,
    ) -> Result<MockLink, TransportError> {
        let delay = {
            let mut inner = self.state.lock();
            inner.calls.connects += 1;
            inner.last_address_type = Some(address_type);
            if !inner.started {
                return Err(TransportError::NotStarted);
            }
            inner.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.state.lock();
        if inner.fail_connect {
            return Err(TransportError::Backend("connection refused".to_string()));
        }
        if !inner.devices.iter().any(|d| d.address == address) {
            return Err(TransportError::DeviceUnknown(address.to_string()));
        }
        inner.connected_address = Some(address.to_string());
        inner.link_lost = false;
        Ok(MockLink {
            state: self.state.clone(),
        })
    }
}

/// Link to the mock peripheral.
pub struct MockLink {
    state: MockState,
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut inner = self.state.lock();
        inner.calls.disconnects += 1;
        inner.connected_address = None;
        inner.subscriptions.clear();
        Ok(())
    }

    async fn get_handle(&mut self, uuid: Uuid) -> Result<Handle, TransportError> {
        let inner = self.state.lock();
        handle_for(&inner.characteristics, uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    async fn discover_characteristics(&mut self) -> Result<Vec<Uuid>, TransportError> {
        let mut inner = self.state.lock();
        inner.calls.discoveries += 1;
        if inner.fail_discovery {
            return Err(TransportError::Backend("discovery failed".to_string()));
        }
        Ok(inner.characteristics.clone())
    }

    async fn subscribe(
        &mut self,
        uuid: Uuid,
        callback: Option<NotificationCallback>,
    ) -> Result<(), TransportError> {
        let mut inner = self.state.lock();
        inner.calls.subscribes += 1;
        if inner.fail_subscribe.contains(&uuid) {
            return Err(TransportError::Backend("write to CCCD failed".to_string()));
        }
        if !inner.characteristics.contains(&uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        inner.subscriptions.insert(uuid, callback);
        Ok(())
    }

    async fn unsubscribe(&mut self, uuid: Uuid) -> Result<(), TransportError> {
        let mut inner = self.state.lock();
        inner.calls.unsubscribes += 1;
        if inner.fail_unsubscribe {
            return Err(TransportError::Backend("link lost".to_string()));
        }
        inner.subscriptions.remove(&uuid);
        Ok(())
    }

    async fn get_rssi(&mut self) -> Result<i16, TransportError> {
        let inner = self.state.lock();
        if inner.fail_rssi {
            return Err(TransportError::Backend("rssi unavailable".to_string()));
        }
        Ok(inner.rssi)
    }

    fn is_lost(&self) -> bool {
        self.state.lock().link_lost
    }
}
