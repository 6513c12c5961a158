//! BLE Connection Module
//!
//! Owns the adapter and the single device session: adapter start/stop, scan
//! and name resolution, connect/disconnect, and the handle resolution and
//! subscriptions performed on a successful connect.
//!
//! Every failure path resets to a consistent "not connected" state before the
//! error is returned. Teardown paths never return errors.

use crate::domain::buffer::InboundBuffer;
use crate::domain::models::{
    AdapterState, Channel, ChannelSet, ConnectionState, DeviceDescriptor, OpenMode, ScanPolicy,
    UartEvent,
};
use crate::domain::settings::Settings;
use crate::error::{TransportError, UartError};
use crate::infrastructure::bluetooth::protocol::{
    ADDRESS_TYPE, CONNECT_TIMEOUT, DEFAULT_SCAN_TIMEOUT,
};
use crate::infrastructure::bluetooth::registry::{
    self, ChannelHandles, CharacteristicCache,
};
use crate::infrastructure::bluetooth::subscription;
use crate::infrastructure::bluetooth::transport::{DeviceLink, Handle, Transport};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Scan window used when resolving a device by name
    pub scan_timeout: Duration,
    /// Upper bound for a transport-level connect
    pub connect_timeout: Duration,
    /// Whether scans reuse the cached result list
    pub scan_policy: ScanPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            scan_policy: ScanPolicy::default(),
        }
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            scan_timeout: settings.scan_timeout(),
            scan_policy: settings.scan_policy,
            ..Self::default()
        }
    }
}

/// The device a session is (or was) bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub name: Option<String>,
    pub address: String,
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} at {}", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

struct Session<L> {
    target: DeviceTarget,
    link: L,
    rssi: Option<i16>,
    handles: ChannelHandles,
    characteristics: CharacteristicCache,
    subscribed: ChannelSet,
}

enum SessionState<L> {
    Idle,
    Connecting(DeviceTarget),
    Connected(Session<L>),
    Disconnected(Option<DeviceTarget>),
}

/// Adapter plus at most one connected peripheral.
pub struct Connection<T: Transport> {
    transport: T,
    adapter: AdapterState,
    session: SessionState<T::Link>,
    devices: Option<Vec<DeviceDescriptor>>,
    config: ConnectionConfig,
    inbound: InboundBuffer,
    events: Option<mpsc::UnboundedSender<UartEvent>>,
}

impl<T: Transport> Connection<T> {
    /// `inbound` receives every TX notification once subscribed.
    pub fn new(transport: T, config: ConnectionConfig, inbound: InboundBuffer) -> Self {
        Self {
            transport,
            adapter: AdapterState::Stopped,
            session: SessionState::Idle,
            devices: None,
            config,
            inbound,
            events: None,
        }
    }

    /// Publish status events to `sender`.
    pub fn set_events(&mut self, sender: mpsc::UnboundedSender<UartEvent>) {
        self.events = Some(sender);
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    pub fn connection_state(&self) -> ConnectionState {
        match &self.session {
            SessionState::Idle => ConnectionState::Idle,
            SessionState::Connecting(_) => ConnectionState::Connecting,
            SessionState::Connected(session) => ConnectionState::Connected {
                subscribed: session.subscribed,
            },
            SessionState::Disconnected(_) => ConnectionState::Disconnected,
        }
    }

    /// Device of the current or most recent session.
    pub fn target(&self) -> Option<&DeviceTarget> {
        match &self.session {
            SessionState::Idle => None,
            SessionState::Connecting(target) => Some(target),
            SessionState::Connected(session) => Some(&session.target),
            SessionState::Disconnected(target) => target.as_ref(),
        }
    }

    pub fn subscribed_channels(&self) -> ChannelSet {
        match &self.session {
            SessionState::Connected(session) => session.subscribed,
            _ => ChannelSet::empty(),
        }
    }

    pub fn channel_handle(&self, channel: Channel) -> Option<Handle> {
        match &self.session {
            SessionState::Connected(session) => session.handles.get(channel),
            _ => None,
        }
    }

    /// Result list held by the scan cache, if any.
    pub fn cached_devices(&self) -> Option<&[DeviceDescriptor]> {
        self.devices.as_deref()
    }

    /// Start the adapter. No-op when already started; on failure the
    /// adapter stays `Stopped`.
    pub async fn start(&mut self) -> Result<(), UartError> {
        if self.adapter == AdapterState::Started {
            return Ok(());
        }
        match self.transport.start().await {
            Ok(()) => {
                self.set_adapter(AdapterState::Started);
                info!("Started BLE adapter");
                Ok(())
            }
            Err(e) => {
                error!("Connection to BLE adapter failed - {}", e);
                Err(UartError::Adapter(e))
            }
        }
    }

    /// Release the adapter. No-op when already stopped. A live session is
    /// severed with it.
    pub async fn stop(&mut self) {
        if self.adapter == AdapterState::Stopped {
            return;
        }
        if matches!(self.session, SessionState::Connected(_)) {
            let previous = std::mem::replace(&mut self.session, SessionState::Disconnected(None));
            if let SessionState::Connected(session) = previous {
                warn!("Stopping adapter while connected to {}", session.target);
                let target = Self::release(session).await;
                self.set_session(SessionState::Disconnected(Some(target)));
            }
        }
        if let Err(e) = self.transport.stop().await {
            warn!("BLE adapter reported an error while stopping - {}", e);
        }
        self.set_adapter(AdapterState::Stopped);
        info!("Stopped BLE adapter");
    }

    /// Scan for nearby devices, starting the adapter if needed.
    ///
    /// Under [`ScanPolicy::ScanOnce`] the first non-empty result is cached and
    /// returned by every later call; an empty result is never cached.
    pub async fn scan(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Vec<DeviceDescriptor>, UartError> {
        self.start().await?;

        if self.config.scan_policy == ScanPolicy::ScanOnce {
            if let Some(devices) = &self.devices {
                debug!("Using {} cached scan results", devices.len());
                return Ok(devices.clone());
            }
        }

        let devices = match self.transport.scan(timeout).await {
            Ok(devices) => devices,
            Err(source) => {
                let err = UartError::ScanFailed { source };
                error!("{}", err);
                return Err(err);
            }
        };
        info!("Scan found {} devices", devices.len());
        self.devices = if devices.is_empty() {
            None
        } else {
            Some(devices.clone())
        };
        Ok(devices)
    }

    /// Forget cached scan results so the next scan goes to the transport.
    pub fn clear_scan_cache(&mut self) {
        self.devices = None;
    }

    /// Connect by name or address and subscribe the channels `mode` asks for.
    ///
    /// An address wins over a name. A name is resolved against the scan
    /// results. Any failure leaves the adapter stopped and the connection
    /// not connected.
    pub async fn connect(
        &mut self,
        name: Option<&str>,
        address: Option<&str>,
        mode: OpenMode,
    ) -> Result<(), UartError> {
        let name = name.filter(|n| !n.is_empty());
        let address = address.filter(|a| !a.is_empty());
        let Some(requested) = address.or(name) else {
            error!("The device name and address cannot both be None");
            return Err(UartError::InvalidArgument(
                "the device name and address cannot both be None".to_string(),
            ));
        };

        if let SessionState::Connected(session) = &self.session {
            info!("Closing session with {} before reconnecting", session.target);
            self.unsubscribe(ChannelSet::all()).await;
            self.disconnect().await;
        }

        self.start().await?;

        let address = match address {
            Some(address) => {
                info!("Connecting to device at {}...", address);
                address.to_string()
            }
            None => self.resolve_address(requested).await?,
        };
        let target = DeviceTarget {
            name: name.map(str::to_owned),
            address,
        };

        self.set_session(SessionState::Connecting(target.clone()));
        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(
            timeout,
            self.transport.connect(&target.address, timeout, ADDRESS_TYPE),
        )
        .await;
        let mut link = match attempt {
            Ok(Ok(link)) => link,
            Ok(Err(source)) => return Err(self.fail_connect(target, source).await),
            Err(_) => {
                return Err(self
                    .fail_connect(target, TransportError::Timeout(timeout))
                    .await)
            }
        };
        info!("Connected to {}", target);

        let rssi = match link.get_rssi().await {
            Ok(rssi) => Some(rssi),
            Err(e) => {
                warn!("Could not read rssi from {} - {}", target, e);
                None
            }
        };
        let handles = ChannelHandles::resolve(&mut link).await;
        let mut session = Session {
            target,
            link,
            rssi,
            handles,
            characteristics: CharacteristicCache::new(),
            subscribed: ChannelSet::empty(),
        };

        for channel in mode.channels().iter() {
            let callback =
                subscription::inbound_callback(self.inbound.clone(), self.events.clone());
            let result = subscription::subscribe(
                &mut session.link,
                &mut session.characteristics,
                &mut session.subscribed,
                channel,
                Some(callback),
            )
            .await;
            if let Err(err) = result {
                // A broken channel invalidates the whole adapter session.
                let target = Self::release(session).await;
                self.set_session(SessionState::Disconnected(Some(target)));
                self.stop().await;
                error!("BLE adapter stopped");
                return Err(err);
            }
        }

        self.set_session(SessionState::Connected(session));
        Ok(())
    }

    /// End the session. No-op unless connected; never fails.
    pub async fn disconnect(&mut self) {
        if !matches!(self.session, SessionState::Connected(_)) {
            return;
        }
        let previous = std::mem::replace(&mut self.session, SessionState::Disconnected(None));
        if let SessionState::Connected(session) = previous {
            let target = Self::release(session).await;
            info!("Disconnected from {}", target);
            self.set_session(SessionState::Disconnected(Some(target)));
        }
    }

    /// Notice a link the peripheral or the OS dropped on its own. Returns
    /// `true` while the session is still connected.
    pub async fn check_link(&mut self) -> bool {
        let lost = match &self.session {
            SessionState::Connected(session) => session.link.is_lost(),
            _ => return false,
        };
        if !lost {
            return true;
        }
        let previous = std::mem::replace(&mut self.session, SessionState::Disconnected(None));
        if let SessionState::Connected(session) = previous {
            warn!("Lost link to {}", session.target);
            let target = Self::release(session).await;
            self.set_session(SessionState::Disconnected(Some(target)));
        }
        false
    }

    /// Best-effort unsubscribe; failures are logged only.
    pub async fn unsubscribe(&mut self, channels: ChannelSet) {
        if let SessionState::Connected(session) = &mut self.session {
            subscription::unsubscribe(&mut session.link, &mut session.subscribed, channels).await;
            self.emit(UartEvent::ConnectionStatus(self.connection_state()));
        }
    }

    /// Unsubscribe everything, disconnect and stop the adapter. Every step is
    /// best-effort and the whole call is idempotent.
    pub async fn close(&mut self) {
        self.unsubscribe(ChannelSet::all()).await;
        self.disconnect().await;
        self.stop().await;
    }

    /// Signal strength recorded at connect time. Not being connected is a
    /// soft failure: logged, no value.
    pub fn get_rssi(&self) -> Option<i16> {
        match &self.session {
            SessionState::Connected(session) => match session.rssi {
                Some(rssi) => {
                    info!("Device {}: rssi = {}", session.target, rssi);
                    Some(rssi)
                }
                None => {
                    warn!("No rssi recorded for {}", session.target);
                    None
                }
            },
            _ => {
                error!("Device not connected, cannot determine rssi");
                None
            }
        }
    }

    async fn resolve_address(&mut self, name: &str) -> Result<String, UartError> {
        let scan_timeout = self.config.scan_timeout;
        let resolved = match self.scan(Some(scan_timeout)).await {
            Ok(devices) => registry::resolve_address(&devices, name),
            Err(err) => Err(err),
        };
        if let Err(err) = &resolved {
            error!("{}", err);
            self.stop().await;
        }
        resolved
    }

    /// Best-effort transport disconnect of a session being torn down.
    async fn release(mut session: Session<T::Link>) -> DeviceTarget {
        if let Err(e) = session.link.disconnect().await {
            warn!("Transport disconnect from {} failed - {}", session.target, e);
        }
        session.target
    }

    async fn fail_connect(&mut self, target: DeviceTarget, source: TransportError) -> UartError {
        let err = UartError::ConnectionFailed {
            device: target.to_string(),
            source,
        };
        error!("{}", err);
        self.set_session(SessionState::Disconnected(Some(target)));
        self.stop().await;
        err
    }

    fn set_adapter(&mut self, state: AdapterState) {
        self.adapter = state;
        self.emit(UartEvent::AdapterStatus(state));
    }

    fn set_session(&mut self, state: SessionState<T::Link>) {
        self.session = state;
        self.emit(UartEvent::ConnectionStatus(self.connection_state()));
    }

    fn emit(&self, event: UartEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if let SessionState::Connected(session) = &self.session {
            warn!(
                "Dropping adapter while connected to {}; call close() for an orderly shutdown",
                session.target
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ReadOrder;
    use crate::infrastructure::bluetooth::mock::{MockState, MockTransport};
    use crate::infrastructure::bluetooth::protocol::{
        AddressType, NUS_RX_CHAR_UUID, NUS_SERVICE_UUID, NUS_TX_CHAR_UUID,
    };

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn connection(
        transport: MockTransport,
    ) -> (Connection<MockTransport>, MockState, InboundBuffer) {
        let state = transport.state();
        let inbound = InboundBuffer::new(ReadOrder::Fifo);
        let connection = Connection::new(transport, ConnectionConfig::default(), inbound.clone());
        (connection, state, inbound)
    }

    fn assert_torn_down(connection: &Connection<MockTransport>, state: &MockState) {
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
        assert_eq!(connection.connection_state(), ConnectionState::Disconnected);
        assert!(connection.subscribed_channels().is_empty());
        assert!(!state.is_started());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection.start().await.unwrap();
        connection.start().await.unwrap();
        assert_eq!(connection.adapter_state(), AdapterState::Started);
        assert_eq!(state.calls().starts, 1);
    }

    #[tokio::test]
    async fn test_start_failure_leaves_adapter_stopped() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.fail_start(true);
        let err = connection.start().await.unwrap_err();
        assert_eq!(err, UartError::Adapter(TransportError::NoAdapter));
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_twice_matches_stop_once() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection.start().await.unwrap();
        connection.stop().await;
        let after_one = (connection.adapter_state(), connection.connection_state());
        connection.stop().await;
        assert_eq!(
            (connection.adapter_state(), connection.connection_state()),
            after_one
        );
        assert_eq!(state.calls().stops, 1);
    }

    #[tokio::test]
    async fn test_connect_without_name_or_address() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        let err = connection.connect(None, None, OpenMode::READ).await.unwrap_err();
        assert!(matches!(err, UartError::InvalidArgument(_)));
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
        assert_eq!(connection.connection_state(), ConnectionState::Idle);
        assert_eq!(state.calls().starts, 0);

        connection.start().await.unwrap();
        let err = connection
            .connect(Some(""), Some(""), OpenMode::READ)
            .await
            .unwrap_err();
        assert!(matches!(err, UartError::InvalidArgument(_)));
        assert_eq!(connection.adapter_state(), AdapterState::Started);
    }

    #[tokio::test]
    async fn test_connect_by_name_resolves_address() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap();

        assert_eq!(state.connected_address().as_deref(), Some(ADDRESS));
        assert_eq!(state.last_address_type(), Some(AddressType::Random));
        assert_eq!(state.last_scan_timeout(), Some(Some(DEFAULT_SCAN_TIMEOUT)));
        assert_eq!(
            connection.target(),
            Some(&DeviceTarget {
                name: Some("Nordic_UART".to_string()),
                address: ADDRESS.to_string(),
            })
        );
        assert_eq!(
            connection.connection_state(),
            ConnectionState::Connected {
                subscribed: OpenMode::READ.channels()
            }
        );
        assert!(connection.channel_handle(Channel::Tx).is_some());
        assert!(connection.channel_handle(Channel::Rx).is_some());
    }

    #[tokio::test]
    async fn test_connect_by_address_skips_scan() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection
            .connect(None, Some(ADDRESS), OpenMode::READ_WRITE)
            .await
            .unwrap();
        assert_eq!(state.calls().scans, 0);
        assert_eq!(connection.subscribed_channels(), ChannelSet::all());
        assert!(state.is_subscribed(NUS_TX_CHAR_UUID));
        assert!(state.is_subscribed(NUS_RX_CHAR_UUID));
    }

    #[tokio::test]
    async fn test_unknown_name_stops_adapter() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        let err = connection
            .connect(Some("Thingy"), None, OpenMode::READ)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UartError::DeviceNotFound {
                name: "Thingy".to_string()
            }
        );
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
        assert_eq!(connection.connection_state(), ConnectionState::Idle);
        assert!(!state.is_started());
    }

    #[tokio::test]
    async fn test_scan_failure_during_resolution_stops_adapter() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.fail_scan(true);
        let err = connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap_err();
        assert!(matches!(err, UartError::ScanFailed { .. }));
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_connect_failure_tears_down() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.fail_connect(true);
        let err = connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap_err();
        match err {
            UartError::ConnectionFailed { device, .. } => {
                assert_eq!(device, "Nordic_UART at AA:BB:CC:DD:EE:FF")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_torn_down(&connection, &state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_after_fifteen_seconds() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.set_connect_delay(Duration::from_secs(60));
        let err = connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UartError::ConnectionFailed {
                device: ADDRESS.to_string(),
                source: TransportError::Timeout(CONNECT_TIMEOUT),
            }
        );
        assert_torn_down(&connection, &state);
    }

    #[tokio::test]
    async fn test_subscription_failure_on_present_channel() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.fail_subscribe(NUS_TX_CHAR_UUID);
        let err = connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UartError::SubscriptionFailed {
                channel: Channel::Tx,
                ..
            }
        ));
        assert_torn_down(&connection, &state);
        assert_eq!(state.calls().disconnects, 1);
        assert_eq!(state.connected_address(), None);
    }

    #[tokio::test]
    async fn test_missing_tx_channel_tears_down() {
        let (mut connection, state, inbound) = connection(MockTransport::nordic_uart());
        state.set_characteristics(vec![NUS_SERVICE_UUID, NUS_RX_CHAR_UUID]);
        let err = connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap_err();
        match err {
            UartError::ChannelUnavailable { channel, uuid, .. } => {
                assert_eq!(channel, Channel::Tx);
                assert_eq!(uuid, NUS_TX_CHAR_UUID);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_torn_down(&connection, &state);
        assert_eq!(state.calls().disconnects, 1);
        assert!(!state.notify(NUS_TX_CHAR_UUID, b"late"));
        assert!(inbound.is_empty());
    }

    #[tokio::test]
    async fn test_stop_while_connected_releases_link() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        connection.stop().await;
        assert_torn_down(&connection, &state);
        assert_eq!(state.calls().disconnects, 1);
        assert_eq!(
            connection.target().map(|t| t.address.as_str()),
            Some(ADDRESS)
        );
    }

    #[tokio::test]
    async fn test_lost_link_is_reported() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        assert!(!connection.check_link().await);

        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        assert!(connection.check_link().await);

        state.drop_link();
        assert!(!connection.check_link().await);
        assert_eq!(connection.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connection.adapter_state(), AdapterState::Started);
        assert!(!connection.check_link().await);

        // A fresh connect clears the lost flag
        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        assert!(connection.check_link().await);
    }

    #[tokio::test]
    async fn test_subscription_failure_on_missing_channel() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.set_characteristics(vec![NUS_SERVICE_UUID, NUS_TX_CHAR_UUID]);
        let err = connection
            .connect(None, Some(ADDRESS), OpenMode::READ_WRITE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UartError::ChannelUnavailable {
                channel: Channel::Rx,
                ..
            }
        ));
        assert_torn_down(&connection, &state);
        assert_eq!(state.calls().discoveries, 1);
    }

    #[tokio::test]
    async fn test_rssi_failure_is_not_fatal() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        state.fail_rssi(true);
        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        assert!(connection.connection_state().is_connected());
        assert_eq!(connection.get_rssi(), None);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection.disconnect().await;
        assert_eq!(connection.connection_state(), ConnectionState::Idle);

        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        connection.disconnect().await;
        connection.disconnect().await;
        assert_eq!(connection.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connection.adapter_state(), AdapterState::Started);
        assert_eq!(state.calls().disconnects, 1);
        assert_eq!(connection.get_rssi(), None);
    }

    #[tokio::test]
    async fn test_close_survives_unsubscribe_failure() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        state.fail_unsubscribe(true);

        connection.close().await;
        assert_eq!(connection.connection_state(), ConnectionState::Disconnected);
        assert_eq!(connection.adapter_state(), AdapterState::Stopped);
        assert_eq!(state.calls().unsubscribes, 1);

        connection.close().await;
        assert_eq!(state.calls().disconnects, 1);
        assert_eq!(state.calls().stops, 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let transport = MockTransport::nordic_uart();
        transport.state().set_devices(vec![
            DeviceDescriptor::new("Nordic_UART", ADDRESS, -60),
            DeviceDescriptor::new("Other_UART", "11:22:33:44:55:66", -75),
        ]);
        let (mut connection, state, _) = connection(transport);

        connection
            .connect(Some("Nordic_UART"), None, OpenMode::READ)
            .await
            .unwrap();
        connection
            .connect(Some("Other_UART"), None, OpenMode::READ)
            .await
            .unwrap();

        assert_eq!(state.calls().disconnects, 1);
        assert_eq!(state.calls().unsubscribes, 1);
        assert_eq!(
            state.connected_address().as_deref(),
            Some("11:22:33:44:55:66")
        );
        assert_eq!(state.calls().scans, 1);
    }

    #[tokio::test]
    async fn test_scan_once_caches_results() {
        let (mut connection, state, _) = connection(MockTransport::nordic_uart());
        let first = connection.scan(None).await.unwrap();
        let second = connection.scan(None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(state.calls().scans, 1);
        assert_eq!(state.last_scan_timeout(), Some(None));

        connection.clear_scan_cache();
        connection.scan(None).await.unwrap();
        assert_eq!(state.calls().scans, 2);
    }

    #[tokio::test]
    async fn test_empty_scan_is_not_cached() {
        let (mut connection, state, _) = connection(MockTransport::new());
        assert!(connection.scan(None).await.unwrap().is_empty());
        assert!(connection.cached_devices().is_none());

        state.set_devices(vec![DeviceDescriptor::new("Nordic_UART", ADDRESS, -60)]);
        assert_eq!(connection.scan(None).await.unwrap().len(), 1);
        assert_eq!(state.calls().scans, 2);
    }

    #[tokio::test]
    async fn test_scan_always_policy_rescans() {
        let transport = MockTransport::nordic_uart();
        let state = transport.state();
        let config = ConnectionConfig {
            scan_policy: ScanPolicy::Always,
            ..ConnectionConfig::default()
        };
        let mut connection = Connection::new(transport, config, InboundBuffer::default());
        connection.scan(None).await.unwrap();
        connection.scan(None).await.unwrap();
        assert_eq!(state.calls().scans, 2);
    }

    #[tokio::test]
    async fn test_events_follow_state_changes() {
        let (mut connection, _state, _) = connection(MockTransport::nordic_uart());
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.set_events(tx);

        connection
            .connect(None, Some(ADDRESS), OpenMode::READ)
            .await
            .unwrap();
        connection.close().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                UartEvent::AdapterStatus(AdapterState::Started),
                UartEvent::ConnectionStatus(ConnectionState::Connecting),
                UartEvent::ConnectionStatus(ConnectionState::Connected {
                    subscribed: OpenMode::READ.channels()
                }),
                UartEvent::ConnectionStatus(ConnectionState::Connected {
                    subscribed: ChannelSet::empty()
                }),
                UartEvent::ConnectionStatus(ConnectionState::Disconnected),
                UartEvent::AdapterStatus(AdapterState::Stopped),
            ]
        );
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            scan_timeout_ms: 5_000,
            scan_policy: ScanPolicy::Always,
            ..Settings::default()
        };
        let config = ConnectionConfig::from(&settings);
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, CONNECT_TIMEOUT);
        assert_eq!(config.scan_policy, ScanPolicy::Always);
    }
}
