//! Serial-compatible BLE UART
//!
//! [`BleUart`] lets code written against a serial port talk to a Nordic UART
//! Service peripheral: connect by name or address, poll `read()` for inbound
//! notification chunks, and close when done.

use crate::domain::buffer::InboundBuffer;
use crate::domain::models::{
    AdapterState, Channel, ChannelSet, ConnectionState, DeviceDescriptor, OpenMode, ReadOrder,
    UartEvent,
};
use crate::domain::settings::Settings;
use crate::error::UartError;
use crate::infrastructure::bluetooth::connection::{Connection, ConnectionConfig, DeviceTarget};
use crate::infrastructure::bluetooth::transport::{Handle, Transport};
use tokio::sync::mpsc;
use tracing::error;

/// A BLE UART peripheral behind a serial-port shaped API.
pub struct BleUart<T: Transport> {
    connection: Connection<T>,
    inbound: InboundBuffer,
}

impl<T: Transport> BleUart<T> {
    /// Create an adapter with default timeouts, scan-once caching and FIFO reads.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ConnectionConfig::default(), ReadOrder::default())
    }

    pub fn with_settings(transport: T, settings: &Settings) -> Self {
        Self::with_config(
            transport,
            ConnectionConfig::from(settings),
            settings.read_order,
        )
    }

    pub fn with_config(transport: T, config: ConnectionConfig, order: ReadOrder) -> Self {
        let inbound = InboundBuffer::new(order);
        Self {
            connection: Connection::new(transport, config, inbound.clone()),
            inbound,
        }
    }

    /// Publish adapter, connection and data events to `sender`.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<UartEvent>) -> Self {
        self.connection.set_events(sender);
        self
    }

    // ---- Connection ----

    /// Connect to a device by name or address. `mode` containing `r`
    /// subscribes to TX (inbound data), `w` subscribes to RX.
    pub async fn connect(
        &mut self,
        name: Option<&str>,
        address: Option<&str>,
        mode: OpenMode,
    ) -> Result<(), UartError> {
        self.connection.connect(name, address, mode).await
    }

    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    /// Pick up a link dropped by the peripheral. Returns `true` while still
    /// connected.
    pub async fn check_link(&mut self) -> bool {
        self.connection.check_link().await
    }

    /// End subscriptions, disconnect, and stop the adapter.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }

    /// Scan for nearby devices with the backend's own scan window.
    pub async fn scan(&mut self) -> Result<Vec<DeviceDescriptor>, UartError> {
        self.connection.scan(None).await
    }

    pub fn clear_scan_cache(&mut self) {
        self.connection.clear_scan_cache();
    }

    pub fn get_rssi(&self) -> Option<i16> {
        self.connection.get_rssi()
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.connection.adapter_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    pub fn target(&self) -> Option<&DeviceTarget> {
        self.connection.target()
    }

    pub fn subscribed_channels(&self) -> ChannelSet {
        self.connection.subscribed_channels()
    }

    pub fn channel_handle(&self, channel: Channel) -> Option<Handle> {
        self.connection.channel_handle(channel)
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }

    // ---- Serial compatibility ----

    /// Next queued chunk, or `None` when nothing is waiting. Never blocks.
    pub fn read(&self) -> Option<Vec<u8>> {
        self.inbound.pop()
    }

    /// Same as [`read`](Self::read): chunks are not split on line endings.
    /// `max_reads` is accepted for signature compatibility only.
    pub fn readline(&self, max_reads: usize) -> Option<Vec<u8>> {
        let _ = max_reads;
        self.inbound.pop()
    }

    /// Number of queued chunks (not bytes).
    pub fn in_waiting(&self) -> usize {
        self.inbound.len()
    }

    pub fn reset_input_buffer(&self) {
        self.inbound.clear();
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
        let _ = data;
        error!("write() has not been implemented");
        Err(UartError::NotImplemented("write"))
    }

    pub fn writeline(&mut self, data: &[u8]) -> Result<usize, UartError> {
        let _ = data;
        error!("writeline() has not been implemented");
        Err(UartError::NotImplemented("writeline"))
    }

    /// No-op; BLE notifications need no flushing.
    pub fn flush(&mut self) -> Result<(), UartError> {
        Ok(())
    }
}
