use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::Channel;

/// Failure reported by a transport backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("adapter is not started")]
    NotStarted,

    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("no peripheral known at address {0}")]
    DeviceUnknown(String),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Backend(String),
}

#[cfg(feature = "btleplug")]
impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::TimedOut(duration) => TransportError::Timeout(duration),
            btleplug::Error::DeviceNotFound => TransportError::DeviceUnknown(String::new()),
            other => TransportError::Backend(other.to_string()),
        }
    }
}

/// Error type surfaced by the serial-style adapter.
///
/// Every variant is raised only after the adapter has been brought back to a
/// state consistent with what `adapter_state()` / `connection_state()` report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UartError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device {name} was not found")]
    DeviceNotFound { name: String },

    #[error("scan for devices failed - {source}")]
    ScanFailed {
        #[source]
        source: TransportError,
    },

    #[error("connection to device {device} failed - {source}")]
    ConnectionFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to subscribe since {channel} UUID{{{uuid}}} was not found on this device - {source}")]
    ChannelUnavailable {
        channel: Channel,
        uuid: Uuid,
        #[source]
        source: TransportError,
    },

    #[error("failed to subscribe to {channel} UUID{{{uuid}}} - {source}")]
    SubscriptionFailed {
        channel: Channel,
        uuid: Uuid,
        #[source]
        source: TransportError,
    },

    #[error("{0}() has not been implemented")]
    NotImplemented(&'static str),

    #[error("connection to BLE adapter failed - {0}")]
    Adapter(#[source] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::NUS_TX_CHAR_UUID;

    #[test]
    fn test_uart_error_display() {
        let err = UartError::DeviceNotFound {
            name: "Nordic_UART".to_string(),
        };
        assert_eq!(err.to_string(), "device Nordic_UART was not found");

        let err = UartError::NotImplemented("write");
        assert_eq!(err.to_string(), "write() has not been implemented");

        let err = UartError::ChannelUnavailable {
            channel: Channel::Tx,
            uuid: NUS_TX_CHAR_UUID,
            source: TransportError::Backend("att error".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to subscribe since NUS_TX UUID{6e400003-b5a3-f393-e0a9-e50e24dcca9e} \
             was not found on this device - att error"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "timed out after 15s");

        let err = TransportError::DeviceUnknown("AA:BB:CC:DD:EE:FF".to_string());
        assert_eq!(
            err.to_string(),
            "no peripheral known at address AA:BB:CC:DD:EE:FF"
        );
    }
}
