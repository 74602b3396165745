//! [`RadioStack`] backed by btleplug.
//!
//! Each request spawns a tokio task that performs the btleplug call and
//! reports the outcome as a [`RadioEvent`]. A background pump translates
//! adapter events (discoveries, disconnects, power changes) the same way,
//! so everything the session sees arrives on one channel.

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::characteristics::{CharacteristicHandle, CharacteristicProperties};
use crate::ble::radio::{
    DiscoveredDevice, PeripheralHandle, PeripheralId, PowerState, RadioEvent, RadioStack,
    ServiceDescriptor, WriteMode,
};
use crate::ble::uuids::CharacteristicId;
use crate::error::{Error, Result};

impl From<CentralState> for PowerState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => Self::On,
            CentralState::PoweredOff => Self::Off,
            CentralState::Unknown => Self::Unknown,
        }
    }
}

impl From<CharPropFlags> for CharacteristicProperties {
    fn from(flags: CharPropFlags) -> Self {
        Self {
            readable: flags.contains(CharPropFlags::READ),
            write_with_response: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
        }
    }
}

impl From<CharacteristicProperties> for CharPropFlags {
    fn from(props: CharacteristicProperties) -> Self {
        let mut flags = CharPropFlags::empty();
        if props.readable {
            flags |= CharPropFlags::READ;
        }
        if props.write_with_response {
            flags |= CharPropFlags::WRITE;
        }
        if props.write_without_response {
            flags |= CharPropFlags::WRITE_WITHOUT_RESPONSE;
        }
        if props.notify {
            flags |= CharPropFlags::NOTIFY;
        }
        flags
    }
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        }
    }
}

fn to_handle(characteristic: &Characteristic) -> CharacteristicHandle {
    CharacteristicHandle::new(
        characteristic.uuid,
        characteristic.service_uuid,
        characteristic.properties.into(),
    )
}

fn to_btleplug(handle: &CharacteristicHandle) -> Characteristic {
    Characteristic {
        uuid: handle.uuid,
        service_uuid: handle.service,
        properties: handle.properties.into(),
        descriptors: BTreeSet::new(),
    }
}

/// The connected peripheral and its notification listener.
#[derive(Default)]
struct ActiveLink {
    peripheral: Option<PeripheralId>,
    listener: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn install(&mut self, peripheral: PeripheralId, listener: JoinHandle<()>) {
        self.release();
        self.peripheral = Some(peripheral);
        self.listener = Some(listener);
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.peripheral = None;
    }

    /// Release the link only when `peripheral` owns it.
    fn release_if(&mut self, peripheral: &PeripheralId) -> bool {
        if self.peripheral.as_ref() != Some(peripheral) {
            return false;
        }
        self.release();
        true
    }
}

/// Shared state between the radio and its spawned tasks.
struct Shared {
    adapter: Adapter,
    events_tx: mpsc::UnboundedSender<RadioEvent>,
    power: RwLock<PowerState>,
    scanning: AtomicBool,
    /// Peripherals seen by the adapter, by platform id string.
    known: RwLock<HashMap<PeripheralId, Peripheral>>,
    /// Characteristics of the connected peripheral, as btleplug reported them.
    characteristics: RwLock<HashMap<CharacteristicId, Characteristic>>,
    /// Services from the last discovery, for per-service characteristic reports.
    services: RwLock<HashMap<uuid::Uuid, Vec<CharacteristicHandle>>>,
    link: RwLock<ActiveLink>,
}

impl Shared {
    fn emit(&self, event: RadioEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("Radio event dropped, session is gone");
        }
    }

    async fn resolve(&self, id: &PeripheralId) -> Option<Peripheral> {
        if let Some(peripheral) = self.known.read().get(id).cloned() {
            return Some(peripheral);
        }

        // Platforms remember peripherals across runs; ask before giving up.
        let peripherals = self.adapter.peripherals().await.ok()?;
        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id.as_str())?;
        self.known.write().insert(id.clone(), peripheral.clone());
        Some(peripheral)
    }

    fn stop_notifications(&self) {
        self.link.write().release();
    }

    /// Forget per-connection state if `peripheral` was the connected one.
    fn release_link(&self, peripheral: &PeripheralId) -> bool {
        if !self.link.write().release_if(peripheral) {
            return false;
        }
        self.characteristics.write().clear();
        self.services.write().clear();
        true
    }
}

/// btleplug implementation of [`RadioStack`].
pub struct BtleplugRadio {
    shared: Arc<Shared>,
    runtime: Handle,
    event_pump: RwLock<Option<JoinHandle<()>>>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter and start pumping its events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events_tx: mpsc::UnboundedSender<RadioEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        Ok(Self::with_adapter(adapter, events_tx).await)
    }

    /// Use a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
        events_tx: mpsc::UnboundedSender<RadioEvent>,
    ) -> Self {
        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let power = match adapter.adapter_state().await {
            Ok(state) => PowerState::from(state),
            Err(e) => {
                warn!("Could not read adapter state: {}", e);
                PowerState::Unknown
            }
        };

        let radio = Self {
            shared: Arc::new(Shared {
                adapter,
                events_tx,
                power: RwLock::new(power),
                scanning: AtomicBool::new(false),
                known: RwLock::new(HashMap::new()),
                characteristics: RwLock::new(HashMap::new()),
                services: RwLock::new(HashMap::new()),
                link: RwLock::new(ActiveLink::default()),
            }),
            runtime: Handle::current(),
            event_pump: RwLock::new(None),
        };
        radio.start_event_pump();
        radio
    }

    fn start_event_pump(&self) {
        let shared = self.shared.clone();

        let handle = self.runtime.spawn(async move {
            let mut events = match shared.adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                Self::handle_central_event(&shared, event).await;
            }

            debug!("Adapter event stream ended");
        });

        *self.event_pump.write() = Some(handle);
    }

    async fn handle_central_event(shared: &Arc<Shared>, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !shared.scanning.load(Ordering::SeqCst) {
                    return;
                }
                Self::process_peripheral(shared, id).await;
            }
            CentralEvent::DeviceConnected(id) => {
                trace!("Adapter reports {:?} connected", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                let id = PeripheralId::new(id.to_string());
                if shared.release_link(&id) {
                    debug!("Connected peripheral {} disconnected", id);
                } else {
                    trace!("Unrelated device {} disconnected", id);
                }
                shared.emit(RadioEvent::Disconnected(id));
            }
            CentralEvent::StateUpdate(state) => {
                let power = PowerState::from(state);
                *shared.power.write() = power;
                shared.emit(RadioEvent::PowerStateChanged(power));
            }
            CentralEvent::ManufacturerDataAdvertisement { .. }
            | CentralEvent::ServiceDataAdvertisement { .. }
            | CentralEvent::ServicesAdvertisement { .. } => {}
        }
    }

    async fn process_peripheral(shared: &Arc<Shared>, id: btleplug::platform::PeripheralId) {
        let peripheral = match shared.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let peripheral_id = PeripheralId::new(id.to_string());
        shared
            .known
            .write()
            .insert(peripheral_id.clone(), peripheral);

        shared.emit(RadioEvent::Discovered(DiscoveredDevice {
            id: peripheral_id,
            name: properties.local_name,
            rssi: properties.rssi,
            manufacturer_data: properties.manufacturer_data,
            services: properties.services,
        }));
    }

    async fn listen_for_notifications(shared: Arc<Shared>, peripheral: Peripheral) {
        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream: {}", e);
                return;
            }
        };

        let peripheral_id = PeripheralId::new(peripheral.id().to_string());
        while let Some(notification) = notifications.next().await {
            shared.emit(RadioEvent::ValueUpdated {
                peripheral: peripheral_id.clone(),
                characteristic: CharacteristicId::from_uuid(notification.uuid),
                result: Ok(Bytes::from(notification.value)),
            });
        }

        debug!("Notification listener stopped");
    }

    fn spawn_for<F, Fut>(&self, id: &PeripheralId, on_missing: RadioEvent, task: F)
    where
        F: FnOnce(Arc<Shared>, Peripheral) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let shared = self.shared.clone();
        let id = id.clone();
        self.runtime.spawn(async move {
            match shared.resolve(&id).await {
                Some(peripheral) => task(shared, peripheral).await,
                None => {
                    warn!("Peripheral {} is not known to the adapter", id);
                    shared.emit(on_missing);
                }
            }
        });
    }

    fn characteristic_for(&self, handle: &CharacteristicHandle) -> Characteristic {
        self.shared
            .characteristics
            .read()
            .get(&handle.id)
            .cloned()
            .unwrap_or_else(|| to_btleplug(handle))
    }
}

impl RadioStack for BtleplugRadio {
    fn power_state(&self) -> PowerState {
        *self.shared.power.read()
    }

    fn start_scan(&self) {
        let shared = self.shared.clone();
        shared.scanning.store(true, Ordering::SeqCst);

        self.runtime.spawn(async move {
            info!("Starting BLE scan");
            if let Err(e) = shared.adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
                shared.scanning.store(false, Ordering::SeqCst);
            }
        });
    }

    fn stop_scan(&self) {
        let shared = self.shared.clone();
        shared.scanning.store(false, Ordering::SeqCst);

        self.runtime.spawn(async move {
            info!("Stopping BLE scan");
            if let Err(e) = shared.adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, peripheral: &PeripheralId) {
        let missing = RadioEvent::ConnectFailed {
            peripheral: peripheral.clone(),
            reason: "unknown peripheral".to_string(),
        };

        self.spawn_for(peripheral, missing, |shared, p| async move {
            let id = PeripheralId::new(p.id().to_string());

            if let Err(e) = p.connect().await {
                shared.emit(RadioEvent::ConnectFailed {
                    peripheral: id,
                    reason: e.to_string(),
                });
                return;
            }

            let name = p
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|props| props.local_name);

            let listener = tokio::spawn(Self::listen_for_notifications(shared.clone(), p));
            shared.link.write().install(id.clone(), listener);

            shared.emit(RadioEvent::Connected(PeripheralHandle::new(id, name)));
        });
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        let missing = RadioEvent::Disconnected(peripheral.clone());

        self.spawn_for(peripheral, missing, |shared, p| async move {
            shared.stop_notifications();
            if let Err(e) = p.disconnect().await {
                warn!("Failed to disconnect: {}", e);
            }
        });
    }

    fn discover_services(&self, peripheral: &PeripheralHandle) {
        let missing = RadioEvent::ServicesDiscovered {
            peripheral: peripheral.id.clone(),
            result: Err("unknown peripheral".to_string()),
        };

        self.spawn_for(&peripheral.id, missing, |shared, p| async move {
            let id = PeripheralId::new(p.id().to_string());

            if let Err(e) = p.discover_services().await {
                shared.emit(RadioEvent::ServicesDiscovered {
                    peripheral: id,
                    result: Err(e.to_string()),
                });
                return;
            }

            let mut characteristics = shared.characteristics.write();
            let mut services = shared.services.write();
            characteristics.clear();
            services.clear();

            let descriptors: Vec<ServiceDescriptor> = p
                .services()
                .into_iter()
                .map(|service| {
                    let handles: Vec<CharacteristicHandle> = service
                        .characteristics
                        .iter()
                        .map(|c| {
                            let handle = to_handle(c);
                            characteristics.insert(handle.id.clone(), c.clone());
                            handle
                        })
                        .collect();
                    services.insert(service.uuid, handles.clone());
                    ServiceDescriptor {
                        uuid: service.uuid,
                        characteristics: handles,
                    }
                })
                .collect();
            drop(characteristics);
            drop(services);

            shared.emit(RadioEvent::ServicesDiscovered {
                peripheral: id,
                result: Ok(descriptors),
            });
        });
    }

    fn discover_characteristics(&self, peripheral: &PeripheralHandle, service: &ServiceDescriptor) {
        // btleplug discovers characteristics together with services.
        let result = self
            .shared
            .services
            .read()
            .get(&service.uuid)
            .cloned()
            .ok_or_else(|| format!("service {} not discovered", service.uuid));

        self.shared.emit(RadioEvent::CharacteristicsDiscovered {
            peripheral: peripheral.id.clone(),
            service: service.uuid,
            result,
        });
    }

    fn read(&self, peripheral: &PeripheralHandle, characteristic: &CharacteristicHandle) {
        let target = self.characteristic_for(characteristic);
        let id = characteristic.id.clone();
        let missing = RadioEvent::ValueUpdated {
            peripheral: peripheral.id.clone(),
            characteristic: id.clone(),
            result: Err("unknown peripheral".to_string()),
        };

        self.spawn_for(&peripheral.id, missing, |shared, p| async move {
            let result = p
                .read(&target)
                .await
                .map(Bytes::from)
                .map_err(|e| e.to_string());
            shared.emit(RadioEvent::ValueUpdated {
                peripheral: PeripheralId::new(p.id().to_string()),
                characteristic: id,
                result,
            });
        });
    }

    fn write(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        payload: Bytes,
        mode: WriteMode,
    ) {
        let target = self.characteristic_for(characteristic);
        let id = characteristic.id.clone();
        let missing = RadioEvent::WriteCompleted {
            peripheral: peripheral.id.clone(),
            characteristic: id.clone(),
            result: Err("unknown peripheral".to_string()),
        };

        self.spawn_for(&peripheral.id, missing, move |shared, p| async move {
            let result = p
                .write(&target, &payload, mode.into())
                .await
                .map_err(|e| e.to_string());
            trace!("Wrote {} bytes to {}", payload.len(), id);
            shared.emit(RadioEvent::WriteCompleted {
                peripheral: PeripheralId::new(p.id().to_string()),
                characteristic: id,
                result,
            });
        });
    }

    fn set_notify(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) {
        let target = self.characteristic_for(characteristic);
        let id = characteristic.id.clone();
        let missing = RadioEvent::NotifyStateChanged {
            peripheral: peripheral.id.clone(),
            characteristic: id.clone(),
            enabled,
            result: Err("unknown peripheral".to_string()),
        };

        self.spawn_for(&peripheral.id, missing, move |shared, p| async move {
            let result = if enabled {
                p.subscribe(&target).await
            } else {
                p.unsubscribe(&target).await
            };
            shared.emit(RadioEvent::NotifyStateChanged {
                peripheral: PeripheralId::new(p.id().to_string()),
                characteristic: id,
                enabled,
                result: result.map_err(|e| e.to_string()),
            });
        });
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.shared.stop_notifications();
        if let Some(handle) = self.event_pump.write().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::DATA_CHARACTERISTIC_UUID;

    #[test]
    fn test_power_state_from_central_state() {
        assert_eq!(PowerState::from(CentralState::PoweredOn), PowerState::On);
        assert_eq!(PowerState::from(CentralState::PoweredOff), PowerState::Off);
        assert_eq!(PowerState::from(CentralState::Unknown), PowerState::Unknown);
    }

    #[test]
    fn test_property_flags() {
        let props = CharacteristicProperties::from(
            CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::INDICATE,
        );
        assert!(props.write_without_response);
        assert!(props.notify);
        assert!(!props.readable);
        assert!(!props.write_with_response);
    }

    #[test]
    fn test_handle_conversion_keeps_identity() {
        let service = uuid::Uuid::from_u128(0x0000_a001_0000_1000_8000_00805f9b34fb);
        let characteristic = Characteristic {
            uuid: DATA_CHARACTERISTIC_UUID,
            service_uuid: service,
            properties: CharPropFlags::NOTIFY | CharPropFlags::WRITE_WITHOUT_RESPONSE,
            descriptors: BTreeSet::new(),
        };

        let handle = to_handle(&characteristic);
        assert_eq!(handle.id.as_str(), "C001");
        assert_eq!(handle.service, service);

        let back = to_btleplug(&handle);
        assert_eq!(back.uuid, characteristic.uuid);
        assert_eq!(back.service_uuid, characteristic.service_uuid);
        assert_eq!(back.properties, characteristic.properties);
    }

    #[tokio::test]
    async fn test_unrelated_disconnect_keeps_listener() {
        let active = PeripheralId::from("UUID-A");
        let mut link = ActiveLink::default();
        link.install(active.clone(), tokio::spawn(futures::future::pending::<()>()));

        assert!(!link.release_if(&PeripheralId::from("UUID-B")));
        assert_eq!(link.peripheral.as_ref(), Some(&active));
        assert!(link.listener.as_ref().map_or(false, |l| !l.is_finished()));

        assert!(link.release_if(&active));
        assert!(link.peripheral.is_none());
        assert!(link.listener.is_none());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_previous_link() {
        let mut link = ActiveLink::default();
        link.install(
            PeripheralId::from("UUID-A"),
            tokio::spawn(futures::future::pending::<()>()),
        );
        link.install(
            PeripheralId::from("UUID-B"),
            tokio::spawn(futures::future::pending::<()>()),
        );

        assert!(!link.release_if(&PeripheralId::from("UUID-A")));
        assert!(link.release_if(&PeripheralId::from("UUID-B")));
    }

    #[test]
    fn test_write_mode_mapping() {
        assert_eq!(WriteType::from(WriteMode::WithResponse), WriteType::WithResponse);
        assert_eq!(
            WriteType::from(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        );
    }
}
