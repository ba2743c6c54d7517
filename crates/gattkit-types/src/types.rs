//! Core data types shared across the gattkit crates.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::uuid::BleUuid;

/// Opaque identifier for a peripheral, assigned by the transport.
///
/// Identifiers are stable for the lifetime of a transport session but are
/// not guaranteed to be stable across sessions or hosts (macOS, for
/// example, hands out per-host random UUIDs rather than MAC addresses).
/// gattkit never interprets the contents; it only compares and displays
/// them.
///
/// # Example
///
/// ```
/// use gattkit_types::DeviceId;
///
/// let id = DeviceId::new("AA:BB:CC:DD:EE:FF");
/// assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Power and authorization state of the host Bluetooth adapter.
///
/// The state starts as [`Unknown`](Self::Unknown) and is updated from
/// transport indications. Radio activity is only possible in
/// [`PoweredOn`](Self::PoweredOn); every other state rejects scanning and
/// connection requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum AdapterState {
    /// State has not been reported yet.
    #[default]
    Unknown,
    /// The adapter is resetting and will report a new state shortly.
    Resetting,
    /// The host has no usable Bluetooth adapter.
    Unsupported,
    /// The application is not authorized to use Bluetooth.
    Unauthorized,
    /// The adapter is present but powered off.
    PoweredOff,
    /// The adapter is powered on and ready for radio activity.
    PoweredOn,
}

impl AdapterState {
    /// Whether scanning and connection requests can be issued in this state.
    pub const fn can_operate(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a single peripheral connection.
///
/// Transitions follow the cycle `Disconnected -> Connecting -> Connected
/// -> Disconnecting -> Disconnected`. An unsolicited disconnection (link
/// loss) moves a connection straight from [`Connected`](Self::Connected)
/// to [`Disconnected`](Self::Disconnected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// No link exists and none is being established.
    #[default]
    Disconnected,
    /// A connection request has been issued and is awaiting its outcome.
    Connecting,
    /// The link is established; GATT traffic is possible.
    Connected,
    /// A disconnect has been requested and is awaiting confirmation.
    Disconnecting,
}

impl ConnectionState {
    /// Whether GATT traffic is currently possible.
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        write!(f, "{s}")
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WriteMode {
    /// ATT Write Request: the peripheral acknowledges each write.
    WithResponse,
    /// ATT Write Command: unacknowledged, throttled by write credits.
    WithoutResponse,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WithResponse => "with response",
            Self::WithoutResponse => "without response",
        };
        write!(f, "{s}")
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The local side requested the disconnect.
    Requested,
    /// The link was lost without a local request, e.g. the peripheral
    /// moved out of range or powered down.
    LinkLoss,
    /// The connection was torn down because of a local error, such as the
    /// adapter powering off underneath it.
    Error,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::LinkLoss => "link loss",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// GATT characteristic property flags.
///
/// A bitfield describing which operations a characteristic supports, as
/// reported by service discovery. The bit layout matches the
/// characteristic properties field of the GATT declaration.
///
/// # Example
///
/// ```
/// use gattkit_types::{CharacteristicProperties, WriteMode};
///
/// let props = CharacteristicProperties::READ | CharacteristicProperties::NOTIFY;
/// assert!(props.can_read());
/// assert!(props.can_subscribe());
/// assert!(!props.can_write(WriteMode::WithResponse));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    /// The value may be broadcast in advertisements.
    pub const BROADCAST: Self = Self(0x01);
    /// The value may be read.
    pub const READ: Self = Self(0x02);
    /// The value may be written without acknowledgement.
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    /// The value may be written with acknowledgement.
    pub const WRITE: Self = Self(0x08);
    /// The peripheral can push value updates without acknowledgement.
    pub const NOTIFY: Self = Self(0x10);
    /// The peripheral can push acknowledged value updates.
    pub const INDICATE: Self = Self(0x20);
    /// Signed writes over an unencrypted link are permitted.
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    /// An Extended Properties descriptor is present.
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    /// No properties set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a property set from a raw GATT properties byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw GATT properties byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether no flags are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the characteristic supports reads.
    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether the characteristic supports the given write mode.
    pub const fn can_write(self, mode: WriteMode) -> bool {
        match mode {
            WriteMode::WithResponse => self.contains(Self::WRITE),
            WriteMode::WithoutResponse => self.contains(Self::WRITE_WITHOUT_RESPONSE),
        }
    }

    /// Whether the characteristic supports notifications or indications.
    pub const fn can_subscribe(self) -> bool {
        self.0 & (Self::NOTIFY.0 | Self::INDICATE.0) != 0
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CharacteristicProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CharacteristicProperties, &str); 8] = [
            (CharacteristicProperties::BROADCAST, "broadcast"),
            (CharacteristicProperties::READ, "read"),
            (CharacteristicProperties::WRITE_WITHOUT_RESPONSE, "write-without-response"),
            (CharacteristicProperties::WRITE, "write"),
            (CharacteristicProperties::NOTIFY, "notify"),
            (CharacteristicProperties::INDICATE, "indicate"),
            (CharacteristicProperties::AUTHENTICATED_SIGNED_WRITES, "signed-write"),
            (CharacteristicProperties::EXTENDED_PROPERTIES, "extended"),
        ];
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A device sighting reported during a scan session.
///
/// Carries the advertisement fields the transport surfaced for the
/// sighting. `services` lists the service UUIDs present in the
/// advertisement payload, which may be a subset of what discovery later
/// reports.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscoveredDevice {
    /// Transport-assigned peripheral identifier.
    pub id: DeviceId,
    /// Local name from the advertisement, when present.
    pub local_name: Option<String>,
    /// Service UUIDs advertised by the peripheral.
    pub services: Vec<BleUuid>,
    /// Received signal strength in dBm, when the transport reports it.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Whether the advertisement included the given service UUID.
    pub fn advertises(&self, service: BleUuid) -> bool {
        self.services.contains(&service)
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local_name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
