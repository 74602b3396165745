//! Error types for the gatt-central crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The radio is not powered on, so the session is idle.
    #[error("Radio not powered on")]
    RadioNotReady,

    /// The characteristic has not been discovered on the connected peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The identifier of the characteristic that was not found.
        uuid: String,
    },

    /// Service or characteristic discovery was reported as failed by the radio.
    #[error("Discovery failed during {stage}: {reason}")]
    DiscoveryFailed {
        /// Which discovery step failed.
        stage: DiscoveryStage,
        /// Error text reported by the radio.
        reason: String,
    },

    /// An inbound payload was not valid UTF-8.
    #[error("Payload from {uuid} is not valid UTF-8")]
    DecodeFailed {
        /// The characteristic the payload arrived on.
        uuid: String,
    },

    /// The radio reported a failed write.
    #[error("Write to {uuid} failed: {reason}")]
    WriteFailed {
        /// The characteristic that was written.
        uuid: String,
        /// Error text reported by the radio.
        reason: String,
    },

    /// Reading or writing the persistent store failed.
    #[error("Storage error for key {key}: {source}")]
    Storage {
        /// The key being accessed.
        key: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The session task has stopped and can no longer take requests.
    #[error("Session closed")]
    SessionClosed,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The discovery step a [`Error::DiscoveryFailed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStage {
    /// Listing the peripheral's services.
    Services,
    /// Listing the characteristics of one service.
    Characteristics,
}

impl std::fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Services => write!(f, "service discovery"),
            Self::Characteristics => write!(f, "characteristic discovery"),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::CharacteristicNotFound {
            uuid: "C001".to_string(),
        };
        assert_eq!(err.to_string(), "Characteristic not found: C001");

        let err = Error::DiscoveryFailed {
            stage: DiscoveryStage::Services,
            reason: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Discovery failed during service discovery: timeout"
        );
    }
}
