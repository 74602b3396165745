//! Session configuration.
//!
//! Everything here is fixed by the deployment (which peripheral, which
//! characteristic), never by end-user input.

use crate::ble::uuids::{CharacteristicId, DATA_CHARACTERISTIC};

/// Advertised name of the peripheral to pair with.
pub const DEFAULT_EXPECTED_NAME: &str = "peripheral_macOS";

/// Storage key holding the remembered peripheral identifier.
pub const DEFAULT_IDENTITY_KEY: &str = "KEY_PERIPHERAL_UUID";

/// Text shown in place of a payload that is not valid UTF-8.
pub const DEFAULT_DECODE_FALLBACK: &str = "error string";

/// Configuration for a [`CentralSession`](crate::ble::connection::CentralSession).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Advertised name a scanned device must match exactly.
    pub expected_name: String,
    /// Characteristic used for text exchange and notify toggling.
    pub data_characteristic: CharacteristicId,
    /// Storage key for the remembered peripheral.
    pub identity_key: String,
    /// Replacement text for undecodable payloads.
    pub decode_fallback: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_name: DEFAULT_EXPECTED_NAME.to_string(),
            data_characteristic: CharacteristicId::from(DATA_CHARACTERISTIC),
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            decode_fallback: DEFAULT_DECODE_FALLBACK.to_string(),
        }
    }
}

impl SessionConfig {
    /// Set the advertised name to match while scanning.
    pub fn with_expected_name(mut self, name: impl Into<String>) -> Self {
        self.expected_name = name.into();
        self
    }

    /// Set the data characteristic.
    pub fn with_data_characteristic(mut self, id: impl Into<CharacteristicId>) -> Self {
        self.data_characteristic = id.into();
        self
    }

    /// Set the storage key for the remembered peripheral.
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = key.into();
        self
    }

    /// Set the replacement text for undecodable payloads.
    pub fn with_decode_fallback(mut self, text: impl Into<String>) -> Self {
        self.decode_fallback = text.into();
        self
    }
}
