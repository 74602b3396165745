//! GATT characteristic handles and the per-connection registry.
//!
//! The registry maps normalized [`CharacteristicId`]s to the handles
//! discovered on the connected peripheral. It is owned by the active
//! connection, so it is empty before the first connect and after every
//! disconnect.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::uuids::CharacteristicId;

/// Capabilities a characteristic declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    /// Value can be read.
    pub readable: bool,
    /// Supports acknowledged writes.
    pub write_with_response: bool,
    /// Supports unacknowledged writes.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Check if any write mode is supported.
    pub fn is_writable(&self) -> bool {
        self.write_with_response || self.write_without_response
    }
}

/// A characteristic discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicHandle {
    /// Normalized identifier, the registry key.
    pub id: CharacteristicId,
    /// Full characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service: Uuid,
    /// Declared capabilities.
    pub properties: CharacteristicProperties,
    /// Most recent value seen, if any.
    pub value: Option<Bytes>,
}

impl CharacteristicHandle {
    /// Create a handle with no cached value.
    pub fn new(uuid: Uuid, service: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            id: CharacteristicId::from_uuid(uuid),
            uuid,
            service,
            properties,
            value: None,
        }
    }
}

/// Characteristics of the connected peripheral, keyed by id.
#[derive(Debug, Default)]
pub struct CharacteristicRegistry {
    characteristics: HashMap<CharacteristicId, CharacteristicHandle>,
}

impl CharacteristicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a handle under its id.
    pub fn index(&mut self, handle: CharacteristicHandle) {
        trace!("Indexing characteristic {} in service {}", handle.id, handle.service);
        self.characteristics.insert(handle.id.clone(), handle);
    }

    /// Look up a handle. Absence is a normal outcome.
    pub fn lookup(&self, id: &CharacteristicId) -> Option<&CharacteristicHandle> {
        self.characteristics.get(id)
    }

    /// Record the latest value of an indexed characteristic.
    ///
    /// Returns false when the id is not indexed.
    pub fn update_value(&mut self, id: &CharacteristicId, value: Bytes) -> bool {
        match self.characteristics.get_mut(id) {
            Some(handle) => {
                handle.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if !self.characteristics.is_empty() {
            debug!("Clearing {} characteristics", self.characteristics.len());
        }
        self.characteristics.clear();
    }

    /// Number of indexed characteristics.
    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    /// Check if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }

    /// Ids of every indexed characteristic, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &CharacteristicId> {
        self.characteristics.keys()
    }
}
