//! Characteristic identifiers and well-known UUIDs.
//!
//! Characteristic ids are kept in the canonical string form CoreBluetooth
//! uses: UUIDs derived from the Bluetooth base UUID collapse to their short
//! 16 or 32 bit alias (`C001`), everything else is the uppercase hyphenated
//! form. All lookups go through [`CharacteristicId`] so caller input in any
//! case or length resolves to the same key.

use std::fmt;
use uuid::Uuid;

/// The Bluetooth SIG base UUID, `00000000-0000-1000-8000-00805F9B34FB`.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Mask selecting the low 96 bits shared by every base-derived UUID.
const BASE_UUID_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// Short id of the data characteristic the peripheral exposes.
pub const DATA_CHARACTERISTIC: &str = "C001";

/// Full UUID of [`DATA_CHARACTERISTIC`].
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_c001_0000_1000_8000_00805f9b34fb);

/// Normalized characteristic identifier used as the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicId(String);

impl CharacteristicId {
    /// Build an id from a full 128-bit UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        let value = uuid.as_u128();
        if value & BASE_UUID_MASK == BLUETOOTH_BASE_UUID.as_u128() {
            let alias = (value >> 96) as u32;
            if alias <= 0xFFFF {
                return Self(format!("{:04X}", alias));
            }
            return Self(format!("{:08X}", alias));
        }
        Self(uuid.hyphenated().to_string().to_uppercase())
    }

    /// Parse caller input into an id.
    ///
    /// Short aliases and full UUIDs are both accepted; anything else is kept
    /// as an uppercased opaque string so lookups simply miss.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let is_alias = matches!(trimmed.len(), 4 | 8)
            && trimmed.chars().all(|c| c.is_ascii_hexdigit());

        if is_alias {
            if let Ok(alias) = u32::from_str_radix(trimmed, 16) {
                return Self::from_uuid(alias_uuid(alias));
            }
        }

        match Uuid::parse_str(trimmed) {
            Ok(uuid) => Self::from_uuid(uuid),
            Err(_) => Self(trimmed.to_uppercase()),
        }
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Expand a 16 or 32 bit alias onto the base UUID.
fn alias_uuid(alias: u32) -> Uuid {
    Uuid::from_u128(((alias as u128) << 96) | BLUETOOTH_BASE_UUID.as_u128())
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for CharacteristicId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<&str> for CharacteristicId {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_alias_from_uuid() {
        let id = CharacteristicId::from_uuid(DATA_CHARACTERISTIC_UUID);
        assert_eq!(id.as_str(), DATA_CHARACTERISTIC);
    }

    #[test]
    fn test_parse_normalizes_case_and_form() {
        let expected = CharacteristicId::from(DATA_CHARACTERISTIC);
        assert_eq!(CharacteristicId::parse("c001"), expected);
        assert_eq!(CharacteristicId::parse(" C001 "), expected);
        assert_eq!(CharacteristicId::parse("0000c001"), expected);
        assert_eq!(
            CharacteristicId::parse("0000C001"),
            CharacteristicId::from_uuid(DATA_CHARACTERISTIC_UUID)
        );
        assert_eq!(
            CharacteristicId::parse("0000c001-0000-1000-8000-00805f9b34fb"),
            expected
        );
    }

    #[test]
    fn test_32_bit_alias() {
        let uuid = Uuid::from_u128(0x1234_5678_0000_1000_8000_00805f9b34fb);
        assert_eq!(CharacteristicId::from_uuid(uuid).as_str(), "12345678");
    }

    #[test]
    fn test_vendor_uuid_keeps_full_form() {
        let uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);
        let id = CharacteristicId::from_uuid(uuid);
        assert_eq!(id.as_str(), "6E400003-B5A3-F393-E0A9-E50E24DCCA9E");
        assert_eq!(CharacteristicId::parse("6e400003-b5a3-f393-e0a9-e50e24dcca9e"), id);
    }

    #[test]
    fn test_32_bit_alias_round_trips_through_parse() {
        assert_eq!(CharacteristicId::parse("12345678").as_str(), "12345678");
        assert_eq!(CharacteristicId::parse("0000ffe1").as_str(), "FFE1");
    }

    #[test]
    fn test_garbage_input_is_opaque() {
        let id = CharacteristicId::parse("not-a-uuid");
        assert_eq!(id.as_str(), "NOT-A-UUID");
    }
}
