//! Remembered peripheral identity.
//!
//! Holds at most one identifier: the peripheral last matched while scanning.
//! Failures to read or write the backing store are logged and treated as
//! "nothing remembered"; the worst outcome is an extra scan.

use tracing::{debug, info, warn};

use crate::ble::radio::PeripheralId;
use crate::storage::KeyValueStore;

/// A peripheral worth reconnecting to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralIdentity {
    /// Platform identifier used for direct connects.
    pub id: PeripheralId,
    /// Advertised name the peripheral matched on, if known.
    pub name: Option<String>,
}

impl PeripheralIdentity {
    /// Create an identity.
    pub fn new(id: PeripheralId, name: Option<String>) -> Self {
        Self { id, name }
    }
}

/// Single-slot identity cache over a [`KeyValueStore`].
pub struct IdentityCache<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> IdentityCache<S> {
    /// Create a cache storing under `key`.
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Load the remembered identity, if any.
    ///
    /// Only the identifier is persisted, so the returned name is `None`.
    pub fn load(&self) -> Option<PeripheralIdentity> {
        match self.store.get(&self.key) {
            Ok(Some(id)) if !id.is_empty() => {
                debug!("Remembered peripheral: {}", id);
                Some(PeripheralIdentity::new(PeripheralId::new(id), None))
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to load remembered peripheral: {}", e);
                None
            }
        }
    }

    /// Remember `identity`, replacing whatever was stored.
    pub fn remember(&self, identity: &PeripheralIdentity) {
        match self.store.set(&self.key, identity.id.as_str()) {
            Ok(()) => info!("Remembering peripheral {}", identity.id),
            Err(e) => warn!("Failed to remember peripheral {}: {}", identity.id, e),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }
}
