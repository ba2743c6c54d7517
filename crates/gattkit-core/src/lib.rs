//! Central-role GATT client engine for Bluetooth Low Energy.
//!
//! This crate turns the callback-driven, per-platform surface of a BLE
//! stack into one coherent async engine: an [`Adapter`] that scans and
//! connects, [`Peripheral`] handles for connected devices, and ordered
//! event streams for everything the stack reports back. The platform
//! stack itself stays behind the [`Transport`] trait, so the engine runs
//! unchanged against CoreBluetooth, BlueZ, or a mock.
//!
//! # Features
//!
//! - **Adapter tracking**: power and availability state from the platform
//!   stack, with automatic cleanup when the radio goes away
//! - **Scanning**: filtered device discovery with duplicate suppression
//!   and an optional auto-stop deadline
//! - **Connections**: per-peripheral lifecycle with engine-owned connect,
//!   discovery, and operation timeouts
//! - **GATT catalog**: services, characteristics, and descriptors from
//!   discovery, addressable by UUID
//! - **Characteristic I/O**: reads, MTU-aware writes, and notification
//!   subscriptions
//! - **Backpressure**: credit-based flow control for write-without-response
//! - **Mock transport**: test the full engine without BLE hardware
//!
//! # Event Model
//!
//! Requests are *accepted for processing*: they validate synchronously
//! against engine state and return `Ok(())` once handed to the transport.
//! Outcomes always arrive as events, on the adapter stream
//! ([`AdapterEvent`]) or the per-peripheral stream ([`PeripheralEvent`]).
//! A single pump task applies transport indications in arrival order, so
//! every subscriber observes the same sequence the stack reported.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use gattkit_core::mock::MockTransport;
//! use gattkit_core::{Adapter, PeripheralEvent, ScanOptions, uuids};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Any `Transport` implementation can drive the engine; the mock
//!     // stands in for a platform backend here.
//!     let (transport, indications) = MockTransport::new();
//!     let adapter = Adapter::new(transport, indications);
//!
//!     // Scan for heart rate sensors for five seconds.
//!     let mut discovered = adapter.device_stream();
//!     let options = ScanOptions::new()
//!         .service_filter(vec![uuids::HEART_RATE_SERVICE])
//!         .duration(Duration::from_secs(5));
//!     adapter.start_scan(options).await?;
//!
//!     let Some(device) = discovered.next().await else {
//!         return Ok(());
//!     };
//!     println!("Found {device}");
//!
//!     // Connect; establishment and discovery both complete via events.
//!     let peripheral = adapter.connect(&device.id).await?;
//!     let mut events = peripheral.subscribe();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             PeripheralEvent::Connected { mtu } => {
//!                 println!("Connected, MTU {mtu}");
//!                 peripheral.discover_services(&[uuids::HEART_RATE_SERVICE]).await?;
//!             }
//!             PeripheralEvent::DiscoveryCompleted { .. } => {
//!                 peripheral.set_notify(uuids::HEART_RATE_MEASUREMENT, true).await?;
//!             }
//!             PeripheralEvent::ValueUpdated { value, .. } => {
//!                 println!("Measurement: {value:02x?}");
//!             }
//!             PeripheralEvent::Disconnected { reason } => {
//!                 println!("Disconnected: {reason}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod catalog;
pub mod error;
pub mod events;
pub mod io;
pub mod mock;
pub mod peripheral;
pub mod scan;
pub mod transport;

// Core exports
pub use adapter::{Adapter, EngineConfig};
pub use catalog::{Characteristic, Descriptor, Service, ServiceCatalog};
pub use error::{Error, Result};
pub use events::{
    AdapterEvent, AdapterEventReceiver, FailureReason, OperationKind, PeripheralEvent,
    PeripheralEventReceiver, ValueSource,
};
pub use mock::MockTransport;
pub use peripheral::Peripheral;
pub use scan::{DeviceStream, ScanOptions};
pub use transport::{
    CharacteristicInfo, DEFAULT_ATT_MTU, DescriptorInfo, IndicationReceiver, IndicationSender,
    LinkInfo, ServiceInfo, Transport, TransportError, TransportEvent, indication_channel,
};

// Re-export from gattkit-types
pub use gattkit_types::uuid as uuids;
pub use gattkit_types::{
    AdapterState, BleUuid, CharacteristicProperties, ConnectionState, DeviceId, DisconnectReason,
    DiscoveredDevice, WriteMode,
};

/// Type alias for a shared adapter reference.
///
/// This is the recommended way to share an `Adapter` across multiple
/// tasks. `Adapter` intentionally does not implement `Clone` (dropping
/// the last handle stops the event pump, so ownership must stay
/// unambiguous); wrapping it in `Arc` is the standard pattern for
/// concurrent access.
///
/// # Example
///
/// ```no_run
/// use gattkit_core::mock::MockTransport;
/// use gattkit_core::{Adapter, SharedAdapter};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let (transport, indications) = MockTransport::new();
/// let adapter: SharedAdapter = Arc::new(Adapter::new(transport, indications));
///
/// // Clone the Arc to share across tasks.
/// let for_task = Arc::clone(&adapter);
/// tokio::spawn(async move {
///     let _ = for_task.state().await;
/// });
/// # }
/// ```
pub type SharedAdapter = std::sync::Arc<Adapter>;
