//! # gattkit-types
//!
//! Shared data types for the gattkit BLE central-role GATT client.
//!
//! This crate defines the vocabulary used across the gattkit workspace:
//! peripheral identifiers, adapter and connection lifecycle states,
//! characteristic property flags, and canonical attribute UUIDs. It has no
//! I/O of its own and works the same on every platform.
//!
//! ## Features
//!
//! - `serde` (default): `Serialize`/`Deserialize` implementations for all
//!   types, with identifiers and UUIDs serialized transparently.
//!
//! ## Example
//!
//! ```
//! use gattkit_types::{AdapterState, CharacteristicProperties, WriteMode};
//! use gattkit_types::uuid::HEART_RATE_MEASUREMENT;
//!
//! assert!(AdapterState::PoweredOn.can_operate());
//! assert_eq!(HEART_RATE_MEASUREMENT.to_string(), "0x2a37");
//!
//! let props = CharacteristicProperties::from_bits(0x10);
//! assert!(props.can_subscribe());
//! assert!(!props.can_write(WriteMode::WithResponse));
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AdapterState, CharacteristicProperties, ConnectionState, DeviceId, DisconnectReason,
    DiscoveredDevice, WriteMode,
};
pub use uuid::{BLUETOOTH_BASE, BleUuid};
