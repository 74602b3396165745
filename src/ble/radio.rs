//! The radio-stack capability interface.
//!
//! A [`RadioStack`] only ever *requests* work. Every outcome (a discovered
//! device, a completed connect, a write acknowledgement) comes back later as
//! a [`RadioEvent`] fed into [`CentralSession::handle_event`]. This keeps
//! the state machine free of async code and testable without hardware.
//!
//! [`CentralSession::handle_event`]: crate::ble::connection::CentralSession::handle_event

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandle;
use crate::ble::uuids::CharacteristicId;

/// Power state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    /// State not reported yet.
    #[default]
    Unknown,
    /// Radio is off or unavailable.
    Off,
    /// Radio is on and usable.
    On,
}

impl PowerState {
    /// Check if the radio can be used.
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

/// Write acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteMode {
    /// The peripheral acknowledges the write.
    WithResponse,
    /// Fire and forget.
    WithoutResponse,
}

/// Platform-assigned peripheral identifier, stable across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The currently connected remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised name, if known.
    pub name: Option<String>,
}

impl PeripheralHandle {
    /// Create a handle for a peripheral.
    pub fn new(id: PeripheralId, name: Option<String>) -> Self {
        Self { id, name }
    }
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Manufacturer data by company id.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl DiscoveredDevice {
    /// Create a discovered device with an id and optional name.
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: PeripheralId::new(id),
            name: name.map(str::to_string),
            rssi: None,
            manufacturer_data: HashMap::new(),
            services: Vec::new(),
        }
    }
}

/// A service found during discovery, with the characteristics under it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics in discovery order.
    pub characteristics: Vec<CharacteristicHandle>,
}

/// Completion events delivered by the radio stack.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The radio power state changed.
    PowerStateChanged(PowerState),
    /// An advertising device was seen during a scan.
    Discovered(DiscoveredDevice),
    /// A connect request succeeded.
    Connected(PeripheralHandle),
    /// A connect request failed.
    ConnectFailed {
        /// Peripheral that could not be connected.
        peripheral: PeripheralId,
        /// Error text from the radio.
        reason: String,
    },
    /// The peripheral disconnected.
    Disconnected(PeripheralId),
    /// Service discovery finished.
    ServicesDiscovered {
        /// Peripheral the services belong to.
        peripheral: PeripheralId,
        /// Discovered services, or the error text.
        result: std::result::Result<Vec<ServiceDescriptor>, String>,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        /// Peripheral the service belongs to.
        peripheral: PeripheralId,
        /// Service UUID.
        service: Uuid,
        /// Discovered characteristics, or the error text.
        result: std::result::Result<Vec<CharacteristicHandle>, String>,
    },
    /// A characteristic value arrived (read response or notification).
    ValueUpdated {
        /// Peripheral that sent the value.
        peripheral: PeripheralId,
        /// Characteristic the value belongs to.
        characteristic: CharacteristicId,
        /// Payload, or the error text.
        result: std::result::Result<Bytes, String>,
    },
    /// A write request completed.
    WriteCompleted {
        /// Peripheral that was written.
        peripheral: PeripheralId,
        /// Characteristic that was written.
        characteristic: CharacteristicId,
        /// Ok, or the error text.
        result: std::result::Result<(), String>,
    },
    /// A notify subscription change completed.
    NotifyStateChanged {
        /// Peripheral that was changed.
        peripheral: PeripheralId,
        /// Characteristic that was changed.
        characteristic: CharacteristicId,
        /// The requested state.
        enabled: bool,
        /// Ok, or the error text.
        result: std::result::Result<(), String>,
    },
}

/// Fire-and-request radio primitives.
///
/// Implementations must not block; completions are reported as
/// [`RadioEvent`]s on whatever channel the implementation was built with.
#[cfg_attr(test, mockall::automock)]
pub trait RadioStack {
    /// Last known power state.
    fn power_state(&self) -> PowerState;

    /// Start an unfiltered scan for advertising devices.
    fn start_scan(&self);

    /// Stop an in-progress scan.
    fn stop_scan(&self);

    /// Connect directly to a known peripheral.
    fn connect(&self, peripheral: &PeripheralId);

    /// Disconnect from a peripheral.
    fn disconnect(&self, peripheral: &PeripheralId);

    /// Discover every service on the peripheral.
    fn discover_services(&self, peripheral: &PeripheralHandle);

    /// Discover every characteristic of one service.
    fn discover_characteristics(&self, peripheral: &PeripheralHandle, service: &ServiceDescriptor);

    /// Read a characteristic value.
    fn read(&self, peripheral: &PeripheralHandle, characteristic: &CharacteristicHandle);

    /// Write a characteristic value.
    fn write(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        payload: Bytes,
        mode: WriteMode,
    );

    /// Enable or disable notifications on a characteristic.
    fn set_notify(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    );
}

impl<T: RadioStack + ?Sized> RadioStack for std::sync::Arc<T> {
    fn power_state(&self) -> PowerState {
        (**self).power_state()
    }

    fn start_scan(&self) {
        (**self).start_scan()
    }

    fn stop_scan(&self) {
        (**self).stop_scan()
    }

    fn connect(&self, peripheral: &PeripheralId) {
        (**self).connect(peripheral)
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        (**self).disconnect(peripheral)
    }

    fn discover_services(&self, peripheral: &PeripheralHandle) {
        (**self).discover_services(peripheral)
    }

    fn discover_characteristics(&self, peripheral: &PeripheralHandle, service: &ServiceDescriptor) {
        (**self).discover_characteristics(peripheral, service)
    }

    fn read(&self, peripheral: &PeripheralHandle, characteristic: &CharacteristicHandle) {
        (**self).read(peripheral, characteristic)
    }

    fn write(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        payload: Bytes,
        mode: WriteMode,
    ) {
        (**self).write(peripheral, characteristic, payload, mode)
    }

    fn set_notify(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) {
        (**self).set_notify(peripheral, characteristic, enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state() {
        assert!(PowerState::On.is_on());
        assert!(!PowerState::Off.is_on());
        assert!(!PowerState::default().is_on());
    }
}
