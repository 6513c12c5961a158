use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A peripheral reported by a scan. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: String,
    pub rssi: i16,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<String>, rssi: i16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rssi,
        }
    }
}

/// The two logical directions of the UART-like service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Device to client (notify)
    Tx,
    /// Client to device (write)
    Rx,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Tx, Channel::Rx];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Tx => f.write_str("NUS_TX"),
            Channel::Rx => f.write_str("NUS_RX"),
        }
    }
}

/// Subset of {TX, RX}.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSet {
    tx: bool,
    rx: bool,
}

impl ChannelSet {
    pub const fn empty() -> Self {
        Self { tx: false, rx: false }
    }

    pub const fn all() -> Self {
        Self { tx: true, rx: true }
    }

    pub fn contains(&self, channel: Channel) -> bool {
        match channel {
            Channel::Tx => self.tx,
            Channel::Rx => self.rx,
        }
    }

    pub fn insert(&mut self, channel: Channel) {
        self.set(channel, true);
    }

    pub fn remove(&mut self, channel: Channel) {
        self.set(channel, false);
    }

    pub fn is_empty(&self) -> bool {
        !self.tx && !self.rx
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> {
        let set = *self;
        Channel::ALL.into_iter().filter(move |c| set.contains(*c))
    }

    fn set(&mut self, channel: Channel, value: bool) {
        match channel {
            Channel::Tx => self.tx = value,
            Channel::Rx => self.rx = value,
        }
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut set = ChannelSet::empty();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

/// Lifecycle of the physical adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdapterState {
    #[default]
    Stopped,
    Started,
}

/// Single connection state per adapter instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected { subscribed: ChannelSet },
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// Serial-style open mode: `"r"` subscribes TX, `"w"` subscribes RX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
}

impl OpenMode {
    pub const READ: OpenMode = OpenMode {
        read: true,
        write: false,
    };
    pub const WRITE: OpenMode = OpenMode {
        read: false,
        write: true,
    };
    pub const READ_WRITE: OpenMode = OpenMode {
        read: true,
        write: true,
    };

    /// Channels to subscribe on connect, TX first.
    pub fn channels(&self) -> ChannelSet {
        let mut set = ChannelSet::empty();
        if self.read {
            set.insert(Channel::Tx);
        }
        if self.write {
            set.insert(Channel::Rx);
        }
        set
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::READ
    }
}

impl FromStr for OpenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = OpenMode {
            read: false,
            write: false,
        };
        for c in s.chars() {
            match c {
                'r' => mode.read = true,
                'w' => mode.write = true,
                // Accepted for compatibility with file-style mode strings
                'b' | '+' => {}
                other => return Err(format!("unsupported mode character '{}'", other)),
            }
        }
        Ok(mode)
    }
}

impl TryFrom<String> for OpenMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OpenMode> for String {
    fn from(mode: OpenMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        Ok(())
    }
}

/// When a scan goes to the transport instead of the cached result list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Cache the first non-empty result for the lifetime of the instance.
    #[default]
    ScanOnce,
    /// Every scan goes to the transport.
    Always,
}

/// Order in which `read()` hands out queued chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOrder {
    /// Oldest chunk first.
    #[default]
    Fifo,
    /// Most recently received chunk first.
    Lifo,
}

/// Status events published to an optional listener.
#[derive(Debug, Clone, PartialEq)]
pub enum UartEvent {
    AdapterStatus(AdapterState),
    ConnectionStatus(ConnectionState),
    /// A notification chunk was queued; carries the chunk length in bytes.
    DataReceived(usize),
}
