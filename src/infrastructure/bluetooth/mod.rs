//! Bluetooth Module
//!
//! Serial-port style access to a Nordic UART Service peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        BleUart                           │
//! │        (serial-compatible facade, inbound buffer)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Connection                          │
//! │   (adapter start/stop, scan, connect, teardown)          │
//! └──────────┬───────────────────┬──────────────────┬───────┘
//!            │                   │                  │
//!            ▼                   ▼                  ▼
//!     ┌────────────┐     ┌──────────────┐    ┌────────────┐
//!     │  Registry  │     │ Subscription │    │ Transport  │
//!     │ - names    │     │ - subscribe  │    │ - backend  │
//!     │ - handles  │     │ - diagnose   │    │   traits   │
//!     │ - discovery│     │ - unsubscribe│    │            │
//!     └────────────┘     └──────────────┘    └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Nordic UART Service UUIDs, address type and timeouts
//! - [`transport`] - Capability traits a radio backend implements
//! - [`registry`] - Name resolution, channel handles, characteristic cache
//! - [`subscription`] - Channel subscribe/unsubscribe with failure diagnosis
//! - [`connection`] - Adapter and session lifecycle
//! - [`service`] - Serial-compatible facade
//! - [`mock`] - In-memory transport for tests
//! - `btleplug_backend` - Real transport (feature `btleplug`)

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
pub mod connection;
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod subscription;
pub mod transport;

// Re-export main service for convenience
pub use service::BleUart;
