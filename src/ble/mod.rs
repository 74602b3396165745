//! BLE central-role building blocks.
//!
//! The radio interface, the characteristic registry, the connection state
//! machine and the btleplug-backed radio implementation.

pub mod btleplug_radio;
pub mod characteristics;
pub mod connection;
pub mod radio;
pub mod uuids;

pub use btleplug_radio::BtleplugRadio;
pub use characteristics::{CharacteristicHandle, CharacteristicProperties, CharacteristicRegistry};
pub use connection::{CentralSession, Connection, SessionState, UiEvent};
pub use radio::{
    DiscoveredDevice, PeripheralHandle, PeripheralId, PowerState, RadioEvent, RadioStack,
    ServiceDescriptor, WriteMode,
};
pub use uuids::*;
