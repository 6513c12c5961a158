//! Serial-port style access to BLE peripherals exposing the Nordic UART
//! Service.
//!
//! ```no_run
//! use ble_uart_serial::{BleUart, MockTransport, OpenMode};
//!
//! # async fn demo() -> Result<(), ble_uart_serial::UartError> {
//! let mut uart = BleUart::new(MockTransport::nordic_uart());
//! uart.connect(Some("Nordic_UART"), None, OpenMode::READ).await?;
//! while let Some(chunk) = uart.read() {
//!     println!("{}", String::from_utf8_lossy(&chunk));
//! }
//! uart.close().await;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::buffer::InboundBuffer;
pub use domain::models::{
    AdapterState, Channel, ChannelSet, ConnectionState, DeviceDescriptor, OpenMode, ReadOrder,
    ScanPolicy, UartEvent,
};
pub use domain::settings::{LogSettings, Settings, SettingsService};
pub use error::{TransportError, UartError};
pub use infrastructure::bluetooth::connection::{ConnectionConfig, DeviceTarget};
pub use infrastructure::bluetooth::mock::MockTransport;
pub use infrastructure::bluetooth::transport::{DeviceLink, Handle, NotificationCallback, Transport};
pub use infrastructure::bluetooth::BleUart;
pub use infrastructure::logging::{init_logger, LoggingGuard};
#[cfg(feature = "btleplug")]
pub use infrastructure::bluetooth::btleplug_backend::BtleplugTransport;
