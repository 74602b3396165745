//! Identifier-addressed data exchange over the connected peripheral.
//!
//! A [`DataChannel`] is a short-lived view over the radio and the active
//! [`Connection`]. With no connection every lookup misses, which is how
//! "not connected yet" surfaces to callers.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::ble::characteristics::CharacteristicHandle;
use crate::ble::connection::Connection;
use crate::ble::radio::{RadioStack, WriteMode};
use crate::ble::uuids::CharacteristicId;
use crate::error::{Error, Result};

/// Result of a notify toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The subscription change was sent to the radio.
    Requested,
    /// The characteristic is not discovered yet; nothing was sent.
    NotReady,
}

/// Decode a payload received on `id` as UTF-8 text.
pub fn decode_text(id: &CharacteristicId, payload: &[u8]) -> Result<String> {
    std::str::from_utf8(payload)
        .map(str::to_string)
        .map_err(|_| Error::DecodeFailed {
            uuid: id.to_string(),
        })
}

/// Read/write/notify operations against the active connection.
pub struct DataChannel<'a, R> {
    radio: &'a R,
    connection: Option<&'a mut Connection>,
}

impl<'a, R: RadioStack> DataChannel<'a, R> {
    /// Create a channel over `connection`, if there is one.
    pub fn new(radio: &'a R, connection: Option<&'a mut Connection>) -> Self {
        Self { radio, connection }
    }

    fn find(&self, id: &CharacteristicId) -> Result<(&Connection, &CharacteristicHandle)> {
        self.connection
            .as_deref()
            .and_then(|conn| conn.registry().lookup(id).map(|handle| (conn, handle)))
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: id.to_string(),
            })
    }

    /// Write `payload` to a characteristic.
    ///
    /// Fails with [`Error::CharacteristicNotFound`] without touching the radio
    /// when the id is not indexed. The radio's completion is reported later
    /// as a `WriteCompleted` event and is not tied back to this call.
    pub fn write(&self, id: &CharacteristicId, payload: Bytes, mode: WriteMode) -> Result<()> {
        let (conn, handle) = self.find(id)?;

        if !handle.properties.is_writable() {
            debug!("Characteristic {} does not declare a write property", id);
        }

        trace!("Writing {} bytes to {} ({:?})", payload.len(), id, mode);
        self.radio.write(conn.peripheral(), handle, payload, mode);
        Ok(())
    }

    /// Request a read of a characteristic. The value arrives as a `ValueUpdated` event.
    pub fn read(&self, id: &CharacteristicId) -> Result<()> {
        let (conn, handle) = self.find(id)?;
        trace!("Requesting read of {}", id);
        self.radio.read(conn.peripheral(), handle);
        Ok(())
    }

    /// Enable or disable notifications.
    ///
    /// A characteristic that is not indexed yet is skipped and reported as
    /// [`NotifyOutcome::NotReady`].
    pub fn set_notify(&self, id: &CharacteristicId, enabled: bool) -> NotifyOutcome {
        match self.find(id) {
            Ok((conn, handle)) => {
                debug!("Setting notify on {} to {}", id, enabled);
                self.radio.set_notify(conn.peripheral(), handle, enabled);
                NotifyOutcome::Requested
            }
            Err(_) => {
                debug!("Ignoring notify toggle for {}: not discovered yet", id);
                NotifyOutcome::NotReady
            }
        }
    }

    /// Handle an inbound value for `id`.
    ///
    /// The value is cached on the handle. Text is returned only for
    /// `subscribed`; anything undecodable becomes `fallback`.
    pub fn value_updated(
        &mut self,
        id: &CharacteristicId,
        payload: Bytes,
        subscribed: &CharacteristicId,
        fallback: &str,
    ) -> Option<String> {
        trace!("Value from {}: {:02X?}", id, &payload[..payload.len().min(20)]);

        if let Some(conn) = self.connection.as_deref_mut() {
            conn.registry_mut().update_value(id, payload.clone());
        }

        if id != subscribed {
            debug!("Value update on {} observed, not forwarded", id);
            return None;
        }

        let text = decode_text(id, &payload).unwrap_or_else(|e| {
            warn!("{}", e);
            fallback.to_string()
        });
        Some(text)
    }
}
