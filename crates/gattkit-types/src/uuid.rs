//! Attribute UUIDs used by GATT services, characteristics, and descriptors.
//!
//! Bluetooth attribute UUIDs come in two forms: full 128-bit values and
//! 16/32-bit shorthand values that expand against the Bluetooth Base UUID
//! (`0000xxxx-0000-1000-8000-00805f9b34fb`). [`BleUuid`] stores every UUID
//! in its canonical 128-bit form so that two spellings of the same
//! attribute always compare equal, while still round-tripping the short
//! form for display and matching.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

use crate::error::ParseError;

/// The Bluetooth Base UUID that 16-bit and 32-bit shorthand UUIDs expand
/// against.
pub const BLUETOOTH_BASE: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

const BASE_BITS: u128 = BLUETOOTH_BASE.as_u128();

/// Mask selecting the low 96 bits, which must match the base UUID for a
/// value to have a short form.
const SHORT_MASK: u128 = (1 << 96) - 1;

/// A GATT attribute UUID in canonical 128-bit form.
///
/// Values constructed from a 16-bit or 32-bit shorthand are expanded
/// against [`BLUETOOTH_BASE`], so `BleUuid::from_u16(0x180d)` equals the
/// full `0000180d-0000-1000-8000-00805f9b34fb`.
///
/// # Example
///
/// ```
/// use gattkit_types::uuid::{BleUuid, HEART_RATE_SERVICE};
///
/// let uuid = BleUuid::from_u16(0x180d);
/// assert_eq!(uuid, HEART_RATE_SERVICE);
/// assert_eq!(uuid.as_u16(), Some(0x180d));
/// assert_eq!(uuid.to_string(), "0x180d");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BleUuid(Uuid);

impl BleUuid {
    /// Expands a 16-bit shorthand UUID against the Bluetooth Base UUID.
    pub const fn from_u16(value: u16) -> Self {
        Self::from_u32(value as u32)
    }

    /// Expands a 32-bit shorthand UUID against the Bluetooth Base UUID.
    pub const fn from_u32(value: u32) -> Self {
        Self(Uuid::from_u128(((value as u128) << 96) | BASE_BITS))
    }

    /// Wraps a full 128-bit UUID given as an integer.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Wraps a full 128-bit UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the canonical 128-bit UUID.
    pub const fn to_uuid(self) -> Uuid {
        self.0
    }

    /// Returns the 16-bit shorthand if this UUID is a base-UUID expansion
    /// of a value that fits in 16 bits.
    pub fn as_u16(&self) -> Option<u16> {
        self.as_u32().and_then(|v| u16::try_from(v).ok())
    }

    /// Returns the 32-bit shorthand if this UUID is a base-UUID expansion.
    pub fn as_u32(&self) -> Option<u32> {
        let bits = self.0.as_u128();
        if bits & SHORT_MASK == BASE_BITS {
            Some((bits >> 96) as u32)
        } else {
            None
        }
    }

    /// Whether this UUID has a 16-bit or 32-bit shorthand form.
    pub fn is_short(&self) -> bool {
        self.as_u32().is_some()
    }
}

impl From<Uuid> for BleUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<BleUuid> for Uuid {
    fn from(uuid: BleUuid) -> Self {
        uuid.0
    }
}

impl From<u16> for BleUuid {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl From<u32> for BleUuid {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(short) = self.as_u16() {
            write!(f, "0x{short:04x}")
        } else if let Some(short) = self.as_u32() {
            write!(f, "0x{short:08x}")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for BleUuid {
    type Err = ParseError;

    /// Parses a 4 or 8 digit hex shorthand (optionally `0x` prefixed) or a
    /// full UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        match hex.len() {
            4 | 8 if hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                let value = u32::from_str_radix(hex, 16)
                    .map_err(|_| ParseError::InvalidUuid(s.to_string()))?;
                Ok(Self::from_u32(value))
            }
            _ => Uuid::parse_str(s)
                .map(Self)
                .map_err(|_| ParseError::InvalidUuid(s.to_string())),
        }
    }
}

// --- Standard GATT service UUIDs ---

/// Generic Access service (0x1800).
pub const GAP_SERVICE: BleUuid = BleUuid::from_u16(0x1800);

/// Generic Attribute service (0x1801).
pub const GATT_SERVICE: BleUuid = BleUuid::from_u16(0x1801);

/// Device Information service (0x180a).
pub const DEVICE_INFORMATION_SERVICE: BleUuid = BleUuid::from_u16(0x180a);

/// Heart Rate service (0x180d).
pub const HEART_RATE_SERVICE: BleUuid = BleUuid::from_u16(0x180d);

/// Battery service (0x180f).
pub const BATTERY_SERVICE: BleUuid = BleUuid::from_u16(0x180f);

// --- Standard GATT characteristic UUIDs ---

/// Device Name characteristic (0x2a00).
pub const DEVICE_NAME: BleUuid = BleUuid::from_u16(0x2a00);

/// Battery Level characteristic (0x2a19).
pub const BATTERY_LEVEL: BleUuid = BleUuid::from_u16(0x2a19);

/// Model Number String characteristic (0x2a24).
pub const MODEL_NUMBER: BleUuid = BleUuid::from_u16(0x2a24);

/// Firmware Revision String characteristic (0x2a26).
pub const FIRMWARE_REVISION: BleUuid = BleUuid::from_u16(0x2a26);

/// Heart Rate Measurement characteristic (0x2a37).
pub const HEART_RATE_MEASUREMENT: BleUuid = BleUuid::from_u16(0x2a37);

// --- Standard GATT descriptor UUIDs ---

/// Characteristic User Description descriptor (0x2901).
pub const CHARACTERISTIC_USER_DESCRIPTION: BleUuid = BleUuid::from_u16(0x2901);

/// Client Characteristic Configuration descriptor (0x2902), written to
/// enable or disable notifications and indications.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: BleUuid = BleUuid::from_u16(0x2902);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expands_against_base() {
        let uuid = BleUuid::from_u16(0x180d);
        assert_eq!(
            uuid.to_uuid().to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_short_forms_round_trip() {
        let uuid = BleUuid::from_u16(0x2a37);
        assert_eq!(uuid.as_u16(), Some(0x2a37));
        assert_eq!(uuid.as_u32(), Some(0x2a37));
        assert!(uuid.is_short());

        let wide = BleUuid::from_u32(0x12345678);
        assert_eq!(wide.as_u16(), None);
        assert_eq!(wide.as_u32(), Some(0x12345678));
        assert!(wide.is_short());
    }

    #[test]
    fn test_full_uuid_has_no_short_form() {
        let uuid = BleUuid::from_uuid(uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e"));
        assert_eq!(uuid.as_u16(), None);
        assert_eq!(uuid.as_u32(), None);
        assert!(!uuid.is_short());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(BleUuid::from_u16(0x2902).to_string(), "0x2902");
        assert_eq!(BleUuid::from_u32(0x12345678).to_string(), "0x12345678");
        let full = BleUuid::from_uuid(uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e"));
        assert_eq!(full.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn test_from_str_accepts_all_forms() {
        assert_eq!("0x180d".parse::<BleUuid>().unwrap(), HEART_RATE_SERVICE);
        assert_eq!("180d".parse::<BleUuid>().unwrap(), HEART_RATE_SERVICE);
        assert_eq!("0000180d".parse::<BleUuid>().unwrap(), HEART_RATE_SERVICE);
        assert_eq!(
            "0000180d-0000-1000-8000-00805f9b34fb".parse::<BleUuid>().unwrap(),
            HEART_RATE_SERVICE
        );
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!("".parse::<BleUuid>().is_err());
        assert!("0xzzzz".parse::<BleUuid>().is_err());
        assert!("not-a-uuid".parse::<BleUuid>().is_err());
        assert!("12345".parse::<BleUuid>().is_err());
    }

    #[test]
    fn test_well_known_values() {
        assert_eq!(HEART_RATE_SERVICE.as_u16(), Some(0x180d));
        assert_eq!(HEART_RATE_MEASUREMENT.as_u16(), Some(0x2a37));
        assert_eq!(BATTERY_SERVICE.as_u16(), Some(0x180f));
        assert_eq!(BATTERY_LEVEL.as_u16(), Some(0x2a19));
        assert_eq!(CLIENT_CHARACTERISTIC_CONFIGURATION.as_u16(), Some(0x2902));
    }

    #[test]
    fn test_constants_are_distinct() {
        let all = [
            GAP_SERVICE,
            GATT_SERVICE,
            DEVICE_INFORMATION_SERVICE,
            HEART_RATE_SERVICE,
            BATTERY_SERVICE,
            DEVICE_NAME,
            BATTERY_LEVEL,
            MODEL_NUMBER,
            FIRMWARE_REVISION,
            HEART_RATE_MEASUREMENT,
            CHARACTERISTIC_USER_DESCRIPTION,
            CLIENT_CHARACTERISTIC_CONFIGURATION,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b, "{a} and {b} must be distinct");
            }
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every 16-bit shorthand round-trips through the canonical form.
            #[test]
            fn prop_u16_round_trips(value: u16) {
                let uuid = BleUuid::from_u16(value);
                prop_assert!(uuid.is_short());
                prop_assert_eq!(uuid.as_u16(), Some(value));
            }

            /// Parsing a displayed value yields the same UUID.
            #[test]
            fn prop_display_parse_round_trips(value: u32) {
                let uuid = BleUuid::from_u32(value);
                let parsed: BleUuid = uuid.to_string().parse().unwrap();
                prop_assert_eq!(parsed, uuid);
            }

            /// Parsing arbitrary strings never panics.
            #[test]
            fn prop_from_str_never_panics(s in ".{0,64}") {
                let _ = s.parse::<BleUuid>();
            }
        }
    }
}
