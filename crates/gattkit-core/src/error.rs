//! Error types for engine operations.
//!
//! Every fallible call in this crate returns [`Result`]. Errors returned
//! synchronously mean the request was rejected before any radio traffic;
//! failures of accepted requests are reported asynchronously through
//! events carrying a [`FailureReason`](crate::events::FailureReason).
//!
//! # Error Categories
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | Adapter | [`AdapterUnavailable`](Error::AdapterUnavailable) | Radio off or unauthorized |
//! | Session | [`AlreadyScanning`](Error::AlreadyScanning), [`AlreadyConnected`](Error::AlreadyConnected), [`NotConnected`](Error::NotConnected) | Request conflicts with current lifecycle state |
//! | Catalog | [`NotDiscovered`](Error::NotDiscovered), [`Unsupported`](Error::Unsupported) | Characteristic unknown or lacks the required property |
//! | Flow control | [`PayloadTooLarge`](Error::PayloadTooLarge), [`Backpressure`](Error::Backpressure), [`OperationInProgress`](Error::OperationInProgress), [`Busy`](Error::Busy) | MTU, credit, or per-slot limits hit |
//! | Terminal | [`Timeout`](Error::Timeout), [`Cancelled`](Error::Cancelled), [`Transport`](Error::Transport) | Deadline elapsed, engine shut down, or the transport refused the request |
//!
//! # Recovery
//!
//! - `AdapterUnavailable`: subscribe to adapter events and retry once the
//!   state returns to powered on.
//! - `Backpressure`: wait for credits to drain (a later write will
//!   succeed) or switch to acknowledged writes.
//! - `OperationInProgress` / `Busy`: wait for the corresponding completion
//!   event, then reissue.
//! - `NotDiscovered`: run service discovery first.

use std::time::Duration;

use thiserror::Error;

use gattkit_types::{AdapterState, BleUuid, ConnectionState, DeviceId};

use crate::events::OperationKind;
use crate::transport::TransportError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The adapter is not powered on, so no radio activity is possible.
    #[error("Bluetooth adapter unavailable (state: {state})")]
    AdapterUnavailable {
        /// The adapter state at the time of the request.
        state: AdapterState,
    },

    /// A scan session is already active on this adapter.
    #[error("A scan session is already active")]
    AlreadyScanning,

    /// A live connection to this peripheral already exists.
    #[error("Already connected to {id}")]
    AlreadyConnected {
        /// The peripheral with the existing connection.
        id: DeviceId,
    },

    /// The operation requires an established connection.
    #[error("Not connected to {id} (state: {state})")]
    NotConnected {
        /// The peripheral the request targeted.
        id: DeviceId,
        /// The connection state at the time of the request.
        state: ConnectionState,
    },

    /// The characteristic is not present in the discovered service catalog.
    ///
    /// Also returned when no service discovery has completed yet on this
    /// connection.
    #[error("Characteristic {characteristic} has not been discovered")]
    NotDiscovered {
        /// The characteristic the request targeted.
        characteristic: BleUuid,
    },

    /// The characteristic does not advertise the property the operation
    /// requires.
    #[error("Characteristic {characteristic} does not support {operation}")]
    Unsupported {
        /// The characteristic the request targeted.
        characteristic: BleUuid,
        /// The operation that was attempted.
        operation: String,
    },

    /// The payload exceeds the MTU-derived maximum write length.
    #[error("Payload of {len} bytes exceeds the maximum write length of {max}")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// Current maximum write length for the connection.
        max: usize,
    },

    /// All write-without-response credits are in use.
    #[error("Write-without-response credits exhausted")]
    Backpressure,

    /// An operation of the same kind is already in flight for this
    /// characteristic.
    #[error("A {kind} is already in progress for characteristic {characteristic}")]
    OperationInProgress {
        /// The characteristic the request targeted.
        characteristic: BleUuid,
        /// The kind of operation already in flight.
        kind: OperationKind,
    },

    /// Service discovery is in progress on this connection.
    #[error("Connection is busy with service discovery")]
    Busy,

    /// An engine deadline elapsed before the operation completed.
    ///
    /// Deadline expiry on accepted requests is reported through events;
    /// this variant exists so callers that fold event outcomes back into
    /// a `Result` have a value to produce.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// The deadline that elapsed.
        duration: Duration,
    },

    /// The work was abandoned because the engine or connection went away.
    #[error("Operation cancelled")]
    Cancelled,

    /// The transport rejected the request.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Creates an [`Error::AdapterUnavailable`] carrying the offending state.
    pub fn adapter_unavailable(state: AdapterState) -> Self {
        Self::AdapterUnavailable { state }
    }

    /// Creates an [`Error::NotConnected`] for the given peripheral.
    pub fn not_connected(id: DeviceId, state: ConnectionState) -> Self {
        Self::NotConnected { id, state }
    }

    /// Creates an [`Error::NotDiscovered`] for the given characteristic.
    pub fn not_discovered(characteristic: BleUuid) -> Self {
        Self::NotDiscovered { characteristic }
    }

    /// Creates an [`Error::Unsupported`] for the given characteristic and
    /// operation name.
    pub fn unsupported(characteristic: BleUuid, operation: impl Into<String>) -> Self {
        Self::Unsupported { characteristic, operation: operation.into() }
    }

    /// Creates an [`Error::OperationInProgress`] for the given slot.
    pub fn operation_in_progress(characteristic: BleUuid, kind: OperationKind) -> Self {
        Self::OperationInProgress { characteristic, kind }
    }

    /// Creates an [`Error::Timeout`] with an operation description.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Whether the same request may succeed if retried later without any
    /// other intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backpressure | Self::Busy | Self::OperationInProgress { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::adapter_unavailable(AdapterState::PoweredOff);
        assert_eq!(
            err.to_string(),
            "Bluetooth adapter unavailable (state: powered off)"
        );

        let err = Error::not_connected(DeviceId::new("AA:BB"), ConnectionState::Connecting);
        assert_eq!(err.to_string(), "Not connected to AA:BB (state: connecting)");

        let err = Error::not_discovered(BleUuid::from_u16(0x2a37));
        assert_eq!(err.to_string(), "Characteristic 0x2a37 has not been discovered");

        let err = Error::unsupported(BleUuid::from_u16(0x2a37), "write without response");
        assert_eq!(
            err.to_string(),
            "Characteristic 0x2a37 does not support write without response"
        );

        let err = Error::PayloadTooLarge { len: 200, max: 182 };
        assert_eq!(
            err.to_string(),
            "Payload of 200 bytes exceeds the maximum write length of 182"
        );

        let err = Error::operation_in_progress(BleUuid::from_u16(0x2a19), OperationKind::Read);
        assert_eq!(
            err.to_string(),
            "A read is already in progress for characteristic 0x2a19"
        );
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: Error = TransportError::new(5, "device error").into();
        assert_eq!(err.to_string(), "transport error 5: device error");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Backpressure.is_retryable());
        assert!(Error::Busy.is_retryable());
        assert!(!Error::AlreadyScanning.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
