//! Engine events and the broadcast dispatcher behind them.
//!
//! The engine reports everything that happens after a request is accepted
//! through events: adapter-level events ([`AdapterEvent`]) on a channel
//! owned by the [`Adapter`](crate::Adapter), and per-connection events
//! ([`PeripheralEvent`]) on a channel owned by each connection. Events for
//! one connection are delivered in the order they occurred; no ordering
//! holds across connections.
//!
//! Channels are `tokio::sync::broadcast` channels: every subscriber sees
//! every event sent after it subscribed, and a subscriber that falls more
//! than the channel capacity behind starts losing the oldest events.
//! Events are serializable so they can be logged or forwarded as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use gattkit_types::{AdapterState, BleUuid, DisconnectReason, DiscoveredDevice};

use crate::transport::TransportError;

/// The kind of characteristic operation a pending slot tracks.
///
/// Each (characteristic, kind) pair admits at most one operation in
/// flight at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A characteristic value read.
    Read,
    /// An acknowledged characteristic write.
    Write,
    /// A notification subscription change.
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Subscription => "subscription",
        };
        write!(f, "{s}")
    }
}

/// Why a value update was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// The peripheral pushed the value for a subscribed characteristic.
    Notification,
    /// The value answers an explicit read request.
    ReadResponse,
}

/// Why an accepted request failed.
///
/// Synchronous rejections are reported as [`Error`](crate::Error); this
/// type describes failures that surface later, inside events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureReason {
    /// The engine deadline for the operation elapsed.
    Timeout,
    /// The adapter left the powered-on state while the operation was in
    /// flight.
    AdapterLost,
    /// The operation was abandoned because its connection or the engine
    /// went away.
    Cancelled,
    /// The transport reported an error.
    Transport {
        /// Platform-specific error code.
        code: i32,
        /// Human-readable description.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::AdapterLost => write!(f, "adapter lost"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Transport { code, message } => write!(f, "transport error {code}: {message}"),
        }
    }
}

impl From<TransportError> for FailureReason {
    fn from(err: TransportError) -> Self {
        Self::Transport { code: err.code, message: err.message }
    }
}

/// Adapter-level events: state changes and scan results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AdapterEvent {
    /// The adapter state changed.
    StateChanged {
        /// The new adapter state.
        state: AdapterState,
    },
    /// A peripheral was sighted during an active scan session.
    DeviceDiscovered {
        /// The sighting, including advertisement fields.
        device: DiscoveredDevice,
    },
    /// The scan session ended, whether stopped explicitly, by its
    /// configured duration, or by adapter loss.
    ScanStopped,
}

/// Per-connection events: lifecycle, discovery, and characteristic I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PeripheralEvent {
    /// The connection was established.
    Connected {
        /// Effective ATT MTU for the link.
        mtu: u16,
    },
    /// The connection attempt failed or timed out.
    ConnectFailed {
        /// Why the attempt failed.
        reason: FailureReason,
    },
    /// The connection ended. Terminal for this connection; a later
    /// connect to the same peripheral starts a fresh event channel.
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
    },
    /// Service discovery completed and the catalog was replaced.
    DiscoveryCompleted {
        /// Number of services in the new catalog.
        services: usize,
    },
    /// Service discovery failed or timed out; any previous catalog is
    /// kept unchanged.
    DiscoveryFailed {
        /// Why discovery failed.
        reason: FailureReason,
    },
    /// A characteristic value was received, from a read or a notification.
    ValueUpdated {
        /// The characteristic the value belongs to.
        characteristic: BleUuid,
        /// The received value.
        value: Vec<u8>,
        /// Whether this answers a read or was pushed by the peripheral.
        source: ValueSource,
    },
    /// An acknowledged write completed.
    WriteCompleted {
        /// The characteristic that was written.
        characteristic: BleUuid,
    },
    /// A subscription change took effect.
    SubscriptionChanged {
        /// The characteristic whose subscription changed.
        characteristic: BleUuid,
        /// The new subscription state.
        enabled: bool,
    },
    /// An accepted read, write, or subscription request failed.
    OperationFailed {
        /// The characteristic the operation targeted.
        characteristic: BleUuid,
        /// The kind of operation that failed.
        kind: OperationKind,
        /// Why it failed.
        reason: FailureReason,
    },
}

/// Receiver for adapter-level events.
pub type AdapterEventReceiver = broadcast::Receiver<AdapterEvent>;

/// Receiver for per-connection events.
pub type PeripheralEventReceiver = broadcast::Receiver<PeripheralEvent>;

/// Broadcast dispatcher for engine events.
///
/// Wraps a `tokio::sync::broadcast` sender. Sending never blocks and
/// never fails: an event sent while nobody is subscribed is simply
/// dropped.
#[derive(Debug, Clone)]
pub struct EventDispatcher<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventDispatcher<E> {
    /// Creates a dispatcher whose channel buffers `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        // broadcast::channel panics on a capacity of zero.
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events sent from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all current subscribers.
    pub fn send(&self, event: E) {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
