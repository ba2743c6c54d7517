//! The transport seam between the engine and a platform BLE stack.
//!
//! The engine never talks to a radio directly. It issues requests through
//! the [`Transport`] trait and consumes asynchronous [`TransportEvent`]
//! indications from a channel created with [`indication_channel`]. A
//! transport implementation wraps whatever the platform provides (a
//! CoreBluetooth bridge, BlueZ over D-Bus, an embedded HCI stack) and is
//! free to deliver indications from any thread or task.
//!
//! Request methods return `Ok(())` when the request was handed to the
//! stack; the outcome arrives later as an indication. An `Err` means the
//! stack refused the request outright and no indication will follow for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use gattkit_types::{AdapterState, BleUuid, CharacteristicProperties, DeviceId, DisconnectReason, WriteMode};

/// Default ATT MTU assumed when a transport does not report one after
/// connecting.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// An error reported by the platform transport.
///
/// The engine treats transport errors as opaque: `code` is
/// platform-specific and only `message` is meant for humans.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    /// Platform-specific error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error from a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Link parameters reported by a successful connection.
///
/// Fields a transport cannot determine are `None` and the engine falls
/// back to conservative defaults ([`DEFAULT_ATT_MTU`], the configured
/// default write credits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Negotiated ATT MTU for the link.
    pub mtu: Option<u16>,
    /// Number of write-without-response commands the stack can buffer.
    pub write_credits: Option<u16>,
}

impl LinkInfo {
    /// Creates link info with a known MTU and no credit report.
    pub fn with_mtu(mtu: u16) -> Self {
        Self { mtu: Some(mtu), write_credits: None }
    }
}

/// Wire description of a discovered descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
    /// Attribute UUID of the descriptor.
    pub uuid: BleUuid,
    /// ATT handle of the descriptor.
    pub handle: u16,
}

/// Wire description of a discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    /// Attribute UUID of the characteristic.
    pub uuid: BleUuid,
    /// ATT value handle, used to address the characteristic in requests.
    pub handle: u16,
    /// Property flags from the characteristic declaration.
    pub properties: CharacteristicProperties,
    /// Descriptors attached to the characteristic.
    pub descriptors: Vec<DescriptorInfo>,
}

/// Wire description of a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Attribute UUID of the service.
    pub uuid: BleUuid,
    /// Whether this is a primary service.
    pub is_primary: bool,
    /// Characteristics contained in the service.
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Asynchronous indications delivered by the transport.
///
/// Completion indications (`ConnectionResult`, `ServicesDiscovered`,
/// `ReadCompleted`, `WriteCompleted`, `SubscriptionResult`) answer a prior
/// request. The rest are unsolicited: adapter state changes,
/// advertisements, link loss, buffer drain, and notified values.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TransportEvent {
    /// The adapter changed state.
    AdapterStateChanged {
        /// The new adapter state.
        state: AdapterState,
    },
    /// An advertisement was observed while scanning.
    AdvertisementObserved {
        /// The advertising peripheral.
        id: DeviceId,
        /// Local name from the advertisement payload.
        local_name: Option<String>,
        /// Service UUIDs from the advertisement payload.
        services: Vec<BleUuid>,
        /// Signal strength of the sighting in dBm.
        rssi: Option<i16>,
    },
    /// Outcome of a prior connect request.
    ConnectionResult {
        /// The peripheral the connect targeted.
        id: DeviceId,
        /// Link parameters on success, or why the connect failed.
        result: Result<LinkInfo, TransportError>,
    },
    /// The link to a peripheral ended, whether requested or not.
    DisconnectionObserved {
        /// The peripheral whose link ended.
        id: DeviceId,
        /// Why the link ended.
        reason: DisconnectReason,
    },
    /// Outcome of a prior service discovery request.
    ServicesDiscovered {
        /// The peripheral discovery ran against.
        id: DeviceId,
        /// The discovered service tree, or why discovery failed.
        result: Result<Vec<ServiceInfo>, TransportError>,
    },
    /// Outcome of a prior read request.
    ReadCompleted {
        /// The peripheral the read targeted.
        id: DeviceId,
        /// Value handle of the characteristic.
        handle: u16,
        /// The value read, or why the read failed.
        result: Result<Vec<u8>, TransportError>,
    },
    /// Outcome of a prior acknowledged write request.
    WriteCompleted {
        /// The peripheral the write targeted.
        id: DeviceId,
        /// Value handle of the characteristic.
        handle: u16,
        /// Success, or why the write failed.
        result: Result<(), TransportError>,
    },
    /// The stack drained buffered write-without-response commands,
    /// returning credits to the engine.
    WriteBufferDrained {
        /// The peripheral whose buffer drained.
        id: DeviceId,
        /// Number of credits returned.
        credits: u16,
    },
    /// Outcome of a prior subscription change request.
    SubscriptionResult {
        /// The peripheral the request targeted.
        id: DeviceId,
        /// Value handle of the characteristic.
        handle: u16,
        /// The subscription state that was requested.
        enabled: bool,
        /// Success, or why the change failed.
        result: Result<(), TransportError>,
    },
    /// The peripheral pushed a value for a subscribed characteristic.
    ValueNotified {
        /// The peripheral that sent the value.
        id: DeviceId,
        /// Value handle of the characteristic.
        handle: u16,
        /// The notified value.
        value: Vec<u8>,
    },
}

/// Sending half of the indication channel, held by the transport.
pub type IndicationSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the indication channel, consumed by the engine.
pub type IndicationReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport uses to deliver indications to the
/// engine.
///
/// The channel is unbounded: the engine drains it continuously and must
/// never make a transport block on indication delivery.
pub fn indication_channel() -> (IndicationSender, IndicationReceiver) {
    mpsc::unbounded_channel()
}

/// Requests the engine issues to a platform BLE stack.
///
/// Implementations must be cheap to call: each method should hand the
/// request to the stack and return, with the outcome reported later as a
/// [`TransportEvent`]. All methods may be called concurrently from the
/// engine's tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts advertisement scanning.
    ///
    /// `filter` restricts reports to peripherals advertising at least one
    /// of the given services; an empty filter reports everything.
    async fn start_scan(
        &self,
        filter: &[BleUuid],
        allow_duplicates: bool,
    ) -> Result<(), TransportError>;

    /// Stops advertisement scanning.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Initiates a connection to a peripheral. Answered by
    /// [`TransportEvent::ConnectionResult`].
    async fn connect(&self, id: &DeviceId) -> Result<(), TransportError>;

    /// Initiates an orderly disconnect. Answered by
    /// [`TransportEvent::DisconnectionObserved`].
    async fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError>;

    /// Starts service discovery. Answered by
    /// [`TransportEvent::ServicesDiscovered`].
    ///
    /// `filter` restricts discovery to the given services; an empty filter
    /// discovers everything.
    async fn discover_services(
        &self,
        id: &DeviceId,
        filter: &[BleUuid],
    ) -> Result<(), TransportError>;

    /// Reads a characteristic value. Answered by
    /// [`TransportEvent::ReadCompleted`].
    async fn read(&self, id: &DeviceId, handle: u16) -> Result<(), TransportError>;

    /// Writes a characteristic value. Acknowledged writes are answered by
    /// [`TransportEvent::WriteCompleted`]; unacknowledged writes are not
    /// answered, but buffer drain is reported through
    /// [`TransportEvent::WriteBufferDrained`].
    async fn write(
        &self,
        id: &DeviceId,
        handle: u16,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Enables or disables notifications for a characteristic, including
    /// any descriptor write the platform requires. Answered by
    /// [`TransportEvent::SubscriptionResult`].
    async fn set_subscription(
        &self,
        id: &DeviceId,
        handle: u16,
        enabled: bool,
    ) -> Result<(), TransportError>;
}
