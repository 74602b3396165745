//! Connection lifecycle state machine.
//!
//! [`CentralSession`] drives power-on -> (reconnect | scan) -> connect ->
//! service discovery -> characteristic discovery, one [`RadioEvent`] at a
//! time. It is synchronous and owns all connection state, so callers must
//! confine it to a single task (see [`crate::central`]).

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::ble::characteristics::{CharacteristicHandle, CharacteristicRegistry};
use crate::ble::radio::{
    DiscoveredDevice, PeripheralHandle, PeripheralId, PowerState, RadioEvent, RadioStack,
    ServiceDescriptor, WriteMode,
};
use crate::ble::uuids::CharacteristicId;
use crate::channel::{DataChannel, NotifyOutcome};
use crate::config::SessionConfig;
use crate::error::{DiscoveryStage, Error, Result};
use crate::identity::{IdentityCache, PeripheralIdentity};
use crate::storage::KeyValueStore;

/// Lifecycle state of the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Radio is off; nothing is attempted.
    #[default]
    PoweredOff,
    /// Radio just came on.
    PoweredOn,
    /// Scanning for the expected peripheral.
    Scanning,
    /// Waiting for a connect to complete.
    Connecting {
        /// Peripheral being connected.
        peripheral: PeripheralId,
        /// True when the id came from the identity cache rather than a scan.
        cached: bool,
    },
    /// Connected, services not discovered yet.
    Connected,
    /// Services known, characteristic discovery in flight.
    ServicesDiscovered {
        /// Services still waiting for characteristic discovery.
        pending: usize,
    },
    /// Every service has reported its characteristics.
    Ready,
    /// The connection ended or discovery failed.
    Disconnected,
}

impl SessionState {
    /// Check if a peripheral link is up (any state from `Connected` to `Ready`).
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::ServicesDiscovered { .. } | Self::Ready
        )
    }

    /// Check if a scan or connect is in progress.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting { peripheral, cached: true } => {
                write!(f, "Connecting({}, cached)", peripheral)
            }
            Self::Connecting { peripheral, .. } => write!(f, "Connecting({})", peripheral),
            Self::Connected => write!(f, "Connected"),
            Self::ServicesDiscovered { pending } => write!(f, "ServicesDiscovered({} pending)", pending),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Output for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Text received on the data characteristic.
    TextReceived(String),
    /// The session moved to a new state.
    StateChanged(SessionState),
}

/// One live connection: the peripheral and the characteristics found on it.
#[derive(Debug)]
pub struct Connection {
    peripheral: PeripheralHandle,
    registry: CharacteristicRegistry,
}

impl Connection {
    /// Create a connection with an empty registry.
    pub fn new(peripheral: PeripheralHandle) -> Self {
        Self {
            peripheral,
            registry: CharacteristicRegistry::new(),
        }
    }

    /// The connected peripheral.
    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    /// Characteristics indexed so far.
    pub fn registry(&self) -> &CharacteristicRegistry {
        &self.registry
    }

    /// Mutable access to the registry.
    pub fn registry_mut(&mut self) -> &mut CharacteristicRegistry {
        &mut self.registry
    }
}

/// Central-role session for a single known peripheral.
pub struct CentralSession<R, S> {
    config: SessionConfig,
    radio: R,
    identity: IdentityCache<S>,
    state: SessionState,
    connection: Option<Connection>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl<R: RadioStack, S: KeyValueStore> CentralSession<R, S> {
    /// Create a session in the `PoweredOff` state.
    pub fn new(
        config: SessionConfig,
        radio: R,
        store: S,
        ui_tx: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let identity = IdentityCache::new(store, config.identity_key.clone());
        Self {
            config,
            radio,
            identity,
            state: SessionState::PoweredOff,
            connection: None,
            ui_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The radio this session drives.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The identity cache.
    pub fn identity(&self) -> &IdentityCache<S> {
        &self.identity
    }

    /// The connected peripheral, if any.
    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.connection.as_ref().map(Connection::peripheral)
    }

    /// Look up a characteristic on the active connection.
    pub fn lookup(&self, id: &CharacteristicId) -> Option<&CharacteristicHandle> {
        self.connection.as_ref()?.registry().lookup(id)
    }

    /// Number of characteristics indexed on the active connection.
    pub fn characteristic_count(&self) -> usize {
        self.connection.as_ref().map_or(0, |c| c.registry().len())
    }

    /// Start the session, picking up a radio that is already powered on.
    pub fn start(&mut self) {
        let power = self.radio.power_state();
        if power.is_on() {
            self.on_powered_on();
        } else {
            debug!("Radio is {:?}, waiting for power-on", power);
        }
    }

    /// Restart discovery after a disconnect.
    ///
    /// Does nothing while a scan, connect or connection is already active.
    pub fn reconnect(&mut self) -> Result<()> {
        if !self.radio.power_state().is_on() {
            return Err(Error::RadioNotReady);
        }

        if self.state.is_connected() || self.state.is_transitioning() {
            debug!("Reconnect ignored in state {}", self.state);
            return Ok(());
        }

        self.on_powered_on();
        Ok(())
    }

    /// Stop scanning and drop any connection.
    pub fn shutdown(&mut self) {
        info!("Shutting down central session");

        if self.state == SessionState::Scanning {
            self.radio.stop_scan();
        }

        let target = match &self.state {
            SessionState::Connecting { peripheral, .. } => Some(peripheral.clone()),
            _ => self.peripheral().map(|p| p.id.clone()),
        };
        if let Some(id) = target {
            self.radio.disconnect(&id);
        }

        self.teardown();
        self.set_state(SessionState::Disconnected);
    }

    /// A view for read/write/notify operations on the active connection.
    pub fn data_channel(&mut self) -> DataChannel<'_, R> {
        DataChannel::new(&self.radio, self.connection.as_mut())
    }

    /// Write `payload` to a characteristic.
    pub fn write(&mut self, id: &CharacteristicId, payload: Bytes, mode: WriteMode) -> Result<()> {
        self.data_channel().write(id, payload, mode)
    }

    /// Request a read of a characteristic.
    pub fn read(&mut self, id: &CharacteristicId) -> Result<()> {
        self.data_channel().read(id)
    }

    /// Send text on the data characteristic without response.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        let id = self.config.data_characteristic.clone();
        self.write(
            &id,
            Bytes::copy_from_slice(text.as_bytes()),
            WriteMode::WithoutResponse,
        )
    }

    /// Toggle notifications on the data characteristic.
    pub fn set_notify(&mut self, enabled: bool) -> NotifyOutcome {
        let id = self.config.data_characteristic.clone();
        self.data_channel().set_notify(&id, enabled)
    }

    /// Feed one radio event through the state machine.
    pub fn handle_event(&mut self, event: RadioEvent) {
        trace!("Radio event in state {}: {:?}", self.state, event);

        match event {
            RadioEvent::PowerStateChanged(power) => self.on_power_state(power),
            RadioEvent::Discovered(device) => self.on_discovered(device),
            RadioEvent::Connected(peripheral) => self.on_connected(peripheral),
            RadioEvent::ConnectFailed { peripheral, reason } => {
                self.on_connect_failed(peripheral, reason)
            }
            RadioEvent::Disconnected(peripheral) => self.on_disconnected(peripheral),
            RadioEvent::ServicesDiscovered { peripheral, result } => {
                self.on_services_discovered(peripheral, result)
            }
            RadioEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.on_characteristics_discovered(peripheral, service, result),
            RadioEvent::ValueUpdated {
                peripheral,
                characteristic,
                result,
            } => self.on_value_updated(peripheral, characteristic, result),
            RadioEvent::WriteCompleted {
                characteristic,
                result,
                ..
            } => match result {
                Ok(()) => debug!("Peripheral acknowledged write to {}", characteristic),
                Err(reason) => warn!(
                    "{}",
                    Error::WriteFailed {
                        uuid: characteristic.to_string(),
                        reason,
                    }
                ),
            },
            RadioEvent::NotifyStateChanged {
                characteristic,
                enabled,
                result,
                ..
            } => match result {
                Ok(()) => debug!("Notify on {} is now {}", characteristic, enabled),
                Err(reason) => warn!("Failed to set notify on {}: {}", characteristic, reason),
            },
        }
    }

    fn on_power_state(&mut self, power: PowerState) {
        if power.is_on() {
            match self.state {
                SessionState::PoweredOff | SessionState::Disconnected => self.on_powered_on(),
                _ => debug!("Power-on ignored in state {}", self.state),
            }
            return;
        }

        if self.state != SessionState::PoweredOff {
            info!("Radio powered off ({:?}), session idle", power);
        }
        self.teardown();
        self.set_state(SessionState::PoweredOff);
    }

    fn on_powered_on(&mut self) {
        self.set_state(SessionState::PoweredOn);

        match self.identity.load() {
            Some(identity) => {
                info!("Connecting to remembered peripheral {}", identity.id);
                self.request_connect(identity.id, true);
            }
            None => self.start_scan(),
        }
    }

    fn start_scan(&mut self) {
        info!("Scanning for peripheral named {:?}", self.config.expected_name);
        self.set_state(SessionState::Scanning);
        self.radio.start_scan();
    }

    fn request_connect(&mut self, peripheral: PeripheralId, cached: bool) {
        self.radio.connect(&peripheral);
        self.set_state(SessionState::Connecting { peripheral, cached });
    }

    fn on_discovered(&mut self, device: DiscoveredDevice) {
        if self.state != SessionState::Scanning {
            trace!("Discovery of {} ignored in state {}", device.id, self.state);
            return;
        }

        let Some(name) = device.name.as_deref() else {
            trace!("Ignoring unnamed device {}", device.id);
            return;
        };

        if name != self.config.expected_name {
            trace!("Ignoring device {} ({})", device.id, name);
            return;
        }

        info!("Found {} ({}), rssi {:?}", name, device.id, device.rssi);
        self.radio.stop_scan();
        self.identity.remember(&PeripheralIdentity::new(
            device.id.clone(),
            Some(name.to_string()),
        ));
        self.request_connect(device.id, false);
    }

    fn on_connected(&mut self, peripheral: PeripheralHandle) {
        match &self.state {
            SessionState::Connecting { peripheral: id, .. } if *id == peripheral.id => {}
            _ => {
                debug!("Connect of {} ignored in state {}", peripheral.id, self.state);
                return;
            }
        }

        info!("Connected to {}", peripheral.id);

        self.teardown();
        let connection = Connection::new(peripheral);
        self.radio.discover_services(connection.peripheral());
        self.connection = Some(connection);
        self.set_state(SessionState::Connected);
    }

    fn on_connect_failed(&mut self, peripheral: PeripheralId, reason: String) {
        let cached = match &self.state {
            SessionState::Connecting { peripheral: id, cached } if *id == peripheral => *cached,
            _ => {
                debug!("Connect failure for {} ignored in state {}", peripheral, self.state);
                return;
            }
        };

        warn!("Failed to connect to {}: {}", peripheral, reason);

        if cached {
            info!("Remembered peripheral unreachable, falling back to scanning");
            self.start_scan();
        } else {
            self.set_state(SessionState::Disconnected);
        }
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId) {
        let is_active = self.peripheral().map_or(false, |p| p.id == peripheral)
            || matches!(&self.state, SessionState::Connecting { peripheral: id, .. } if *id == peripheral);

        if !is_active {
            debug!("Disconnect of {} ignored in state {}", peripheral, self.state);
            return;
        }

        info!("Disconnected from {}", peripheral);
        self.teardown();
        self.set_state(SessionState::Disconnected);
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        result: std::result::Result<Vec<ServiceDescriptor>, String>,
    ) {
        if self.state != SessionState::Connected || !self.is_active(&peripheral) {
            debug!("Services for {} ignored in state {}", peripheral, self.state);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                warn!(
                    "{}",
                    Error::DiscoveryFailed {
                        stage: DiscoveryStage::Services,
                        reason,
                    }
                );
                self.radio.disconnect(&peripheral);
                self.teardown();
                self.set_state(SessionState::Disconnected);
                return;
            }
        };

        debug!("Discovered {} services on {}", services.len(), peripheral);

        if services.is_empty() {
            self.set_state(SessionState::Ready);
            return;
        }

        if let Some(conn) = &self.connection {
            for service in &services {
                self.radio.discover_characteristics(conn.peripheral(), service);
            }
        }
        self.set_state(SessionState::ServicesDiscovered {
            pending: services.len(),
        });
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: uuid::Uuid,
        result: std::result::Result<Vec<CharacteristicHandle>, String>,
    ) {
        let pending = match self.state {
            SessionState::ServicesDiscovered { pending } if self.is_active(&peripheral) => pending,
            _ => {
                debug!("Characteristics for {} ignored in state {}", service, self.state);
                return;
            }
        };

        match result {
            Ok(characteristics) => {
                if let Some(conn) = self.connection.as_mut() {
                    for characteristic in characteristics {
                        debug!("Found characteristic {} in service {}", characteristic.id, service);
                        conn.registry_mut().index(characteristic);
                    }
                }
            }
            Err(reason) => warn!(
                "{} (service {})",
                Error::DiscoveryFailed {
                    stage: DiscoveryStage::Characteristics,
                    reason,
                },
                service
            ),
        }

        let pending = pending.saturating_sub(1);
        if pending == 0 {
            if let Some(conn) = &self.connection {
                let mut ids: Vec<&str> = conn.registry().ids().map(CharacteristicId::as_str).collect();
                ids.sort_unstable();
                info!("Session ready with {} characteristics: {:?}", ids.len(), ids);
            }
            self.set_state(SessionState::Ready);
        } else {
            self.set_state(SessionState::ServicesDiscovered { pending });
        }
    }

    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicId,
        result: std::result::Result<Bytes, String>,
    ) {
        if !self.is_active(&peripheral) {
            debug!("Value from inactive peripheral {} ignored", peripheral);
            return;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(reason) => {
                warn!("Value update on {} failed: {}", characteristic, reason);
                return;
            }
        };

        let subscribed = self.config.data_characteristic.clone();
        let fallback = self.config.decode_fallback.clone();
        let text = self
            .data_channel()
            .value_updated(&characteristic, payload, &subscribed, &fallback);

        if let Some(text) = text {
            debug!("Received text: {}", text);
            let _ = self.ui_tx.send(UiEvent::TextReceived(text));
        }
    }

    fn is_active(&self, peripheral: &PeripheralId) -> bool {
        self.peripheral().map_or(false, |p| p.id == *peripheral)
    }

    /// Drop the active connection, clearing its registry.
    fn teardown(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            debug!("Releasing connection to {}", conn.peripheral().id);
            conn.registry_mut().clear();
        }
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state == new_state {
            return;
        }

        debug!("Session state changed: {} -> {}", self.state, new_state);
        self.state = new_state.clone();
        let _ = self.ui_tx.send(UiEvent::StateChanged(new_state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::characteristics::CharacteristicProperties;
    use crate::ble::radio::MockRadioStack;
    use crate::ble::uuids::DATA_CHARACTERISTIC_UUID;
    use crate::storage::MemoryStore;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0x0000_a001_0000_1000_8000_00805f9b34fb);

    fn session(
        radio: MockRadioStack,
    ) -> (
        CentralSession<MockRadioStack, MemoryStore>,
        mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CentralSession::new(SessionConfig::default(), radio, MemoryStore::new(), tx),
            rx,
        )
    }

    fn data_handle() -> CharacteristicHandle {
        CharacteristicHandle::new(
            DATA_CHARACTERISTIC_UUID,
            SERVICE,
            CharacteristicProperties {
                notify: true,
                write_without_response: true,
                ..Default::default()
            },
        )
    }

    fn peripheral() -> PeripheralHandle {
        PeripheralHandle::new(PeripheralId::from("UUID-1"), Some("peripheral_macOS".into()))
    }

    fn permissive_radio() -> MockRadioStack {
        let mut radio = MockRadioStack::new();
        radio.expect_power_state().return_const(PowerState::On);
        radio.expect_start_scan().return_const(());
        radio.expect_stop_scan().return_const(());
        radio.expect_connect().return_const(());
        radio.expect_disconnect().return_const(());
        radio.expect_discover_services().return_const(());
        radio.expect_discover_characteristics().return_const(());
        radio
    }

    fn drive_to_ready(session: &mut CentralSession<MockRadioStack, MemoryStore>) {
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
            "UUID-1",
            Some("peripheral_macOS"),
        )));
        session.handle_event(RadioEvent::Connected(peripheral()));
        session.handle_event(RadioEvent::ServicesDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            result: Ok(vec![ServiceDescriptor {
                uuid: SERVICE,
                characteristics: vec![data_handle()],
            }]),
        });
        session.handle_event(RadioEvent::CharacteristicsDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            service: SERVICE,
            result: Ok(vec![data_handle()]),
        });
    }

    #[test]
    fn test_session_state_predicates() {
        assert!(SessionState::Ready.is_connected());
        assert!(SessionState::ServicesDiscovered { pending: 1 }.is_connected());
        assert!(!SessionState::Scanning.is_connected());
        assert!(SessionState::Scanning.is_transitioning());
        assert!(!SessionState::Disconnected.is_transitioning());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "Ready");
        assert_eq!(
            SessionState::Connecting {
                peripheral: PeripheralId::from("UUID-1"),
                cached: true
            }
            .to_string(),
            "Connecting(UUID-1, cached)"
        );
    }

    #[test]
    fn test_powered_off_stays_idle() {
        let mut radio = MockRadioStack::new();
        radio.expect_power_state().return_const(PowerState::Off);
        radio.expect_start_scan().times(0);
        radio.expect_connect().times(0);

        let (mut session, _rx) = session(radio);
        session.start();
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::Off));
        assert_eq!(session.state(), &SessionState::PoweredOff);
        assert!(matches!(session.reconnect(), Err(Error::RadioNotReady)));
    }

    #[test]
    fn test_empty_cache_scans() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(1).return_const(());
        radio.expect_connect().times(0);

        let (mut session, _rx) = session(radio);
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        assert_eq!(session.state(), &SessionState::Scanning);
    }

    #[test]
    fn test_cached_identity_connects_directly() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(0);
        radio
            .expect_connect()
            .with(eq(PeripheralId::from("UUID-1")))
            .times(1)
            .return_const(());

        let (tx, _rx) = mpsc::unbounded_channel();
        let store = MemoryStore::new();
        store.set("KEY_PERIPHERAL_UUID", "UUID-1").unwrap();
        let mut session = CentralSession::new(SessionConfig::default(), radio, store, tx);

        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        assert_eq!(
            session.state(),
            &SessionState::Connecting {
                peripheral: PeripheralId::from("UUID-1"),
                cached: true
            }
        );
    }

    #[test]
    fn test_name_filter() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(1).return_const(());
        radio.expect_stop_scan().times(0);
        radio.expect_connect().times(0);

        let (mut session, _rx) = session(radio);
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new("UUID-2", None)));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
            "UUID-3",
            Some("peripheral_macOS2"),
        )));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
            "UUID-4",
            Some("Peripheral_macOS"),
        )));

        assert_eq!(session.state(), &SessionState::Scanning);
        assert_eq!(session.identity().load(), None);
    }

    #[test]
    fn test_first_match_wins() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(1).return_const(());
        radio.expect_stop_scan().times(1).return_const(());
        radio
            .expect_connect()
            .with(eq(PeripheralId::from("UUID-1")))
            .times(1)
            .return_const(());

        let (mut session, _rx) = session(radio);
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        for id in ["UUID-1", "UUID-2"] {
            session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
                id,
                Some("peripheral_macOS"),
            )));
        }

        assert_eq!(
            session.identity().load().map(|i| i.id),
            Some(PeripheralId::from("UUID-1"))
        );
    }

    #[test]
    fn test_reaches_ready_and_emits_states() {
        let (mut session, mut rx) = session(permissive_radio());
        drive_to_ready(&mut session);

        assert_eq!(session.state(), &SessionState::Ready);
        assert!(session.lookup(&CharacteristicId::from("C001")).is_some());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let UiEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::PoweredOn,
                SessionState::Scanning,
                SessionState::Connecting {
                    peripheral: PeripheralId::from("UUID-1"),
                    cached: false
                },
                SessionState::Connected,
                SessionState::ServicesDiscovered { pending: 1 },
                SessionState::Ready,
            ]
        );
    }

    #[test]
    fn test_ready_waits_for_every_service() {
        let (mut session, _rx) = session(permissive_radio());
        let second = Uuid::from_u128(0x0000_a002_0000_1000_8000_00805f9b34fb);

        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
            "UUID-1",
            Some("peripheral_macOS"),
        )));
        session.handle_event(RadioEvent::Connected(peripheral()));
        session.handle_event(RadioEvent::ServicesDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            result: Ok(vec![
                ServiceDescriptor {
                    uuid: SERVICE,
                    characteristics: vec![],
                },
                ServiceDescriptor {
                    uuid: second,
                    characteristics: vec![],
                },
            ]),
        });
        session.handle_event(RadioEvent::CharacteristicsDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            service: SERVICE,
            result: Ok(vec![data_handle()]),
        });

        assert_eq!(session.state(), &SessionState::ServicesDiscovered { pending: 1 });
        assert!(session.lookup(&CharacteristicId::from("C001")).is_some());

        session.handle_event(RadioEvent::CharacteristicsDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            service: second,
            result: Err("insufficient authentication".into()),
        });
        assert_eq!(session.state(), &SessionState::Ready);
    }

    #[test]
    fn test_disconnect_clears_registry() {
        let (mut session, _rx) = session(permissive_radio());
        drive_to_ready(&mut session);

        session.handle_event(RadioEvent::Disconnected(PeripheralId::from("UUID-1")));
        assert_eq!(session.state(), &SessionState::Disconnected);
        assert!(session.lookup(&CharacteristicId::from("C001")).is_none());
        assert_eq!(session.characteristic_count(), 0);
        assert!(session.peripheral().is_none());
    }

    #[test]
    fn test_service_discovery_error_halts() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().return_const(());
        radio.expect_stop_scan().return_const(());
        radio.expect_connect().return_const(());
        radio.expect_discover_services().times(1).return_const(());
        radio.expect_discover_characteristics().times(0);
        radio.expect_disconnect().times(1).return_const(());

        let (mut session, _rx) = session(radio);
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.handle_event(RadioEvent::Discovered(DiscoveredDevice::new(
            "UUID-1",
            Some("peripheral_macOS"),
        )));
        session.handle_event(RadioEvent::Connected(peripheral()));
        session.handle_event(RadioEvent::ServicesDiscovered {
            peripheral: PeripheralId::from("UUID-1"),
            result: Err("gatt error".into()),
        });

        assert_eq!(session.state(), &SessionState::Disconnected);
        assert_eq!(session.characteristic_count(), 0);
    }

    #[test]
    fn test_cached_connect_failure_falls_back_to_scan() {
        let mut radio = MockRadioStack::new();
        radio.expect_connect().times(1).return_const(());
        radio.expect_start_scan().times(1).return_const(());

        let (tx, _rx) = mpsc::unbounded_channel();
        let store = MemoryStore::new();
        store.set("KEY_PERIPHERAL_UUID", "UUID-stale").unwrap();
        let mut session = CentralSession::new(SessionConfig::default(), radio, store, tx);

        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.handle_event(RadioEvent::ConnectFailed {
            peripheral: PeripheralId::from("UUID-stale"),
            reason: "unknown peripheral".into(),
        });
        assert_eq!(session.state(), &SessionState::Scanning);
    }

    #[test]
    fn test_events_from_other_peripherals_ignored() {
        let (mut session, mut rx) = session(permissive_radio());
        drive_to_ready(&mut session);
        while rx.try_recv().is_ok() {}

        session.handle_event(RadioEvent::Disconnected(PeripheralId::from("UUID-9")));
        session.handle_event(RadioEvent::ValueUpdated {
            peripheral: PeripheralId::from("UUID-9"),
            characteristic: CharacteristicId::from("C001"),
            result: Ok(Bytes::from_static(b"spoof")),
        });

        assert_eq!(session.state(), &SessionState::Ready);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_power_off_tears_down() {
        let (mut session, _rx) = session(permissive_radio());
        drive_to_ready(&mut session);

        session.handle_event(RadioEvent::PowerStateChanged(PowerState::Off));
        assert_eq!(session.state(), &SessionState::PoweredOff);
        assert_eq!(session.characteristic_count(), 0);
    }

    #[test]
    fn test_notify_toggle_before_ready() {
        let mut radio = MockRadioStack::new();
        radio.expect_set_notify().times(0);

        let (mut session, _rx) = session(radio);
        assert_eq!(session.set_notify(true), NotifyOutcome::NotReady);
    }

    #[test]
    fn test_reconnect_after_disconnect_uses_cache() {
        let mut radio = MockRadioStack::new();
        radio.expect_power_state().return_const(PowerState::On);
        radio.expect_start_scan().times(1).return_const(());
        radio.expect_stop_scan().return_const(());
        radio.expect_connect().times(2).return_const(());
        radio.expect_discover_services().return_const(());
        radio.expect_discover_characteristics().return_const(());

        let (mut session, _rx) = session(radio);
        drive_to_ready(&mut session);
        session.handle_event(RadioEvent::Disconnected(PeripheralId::from("UUID-1")));

        session.reconnect().unwrap();
        assert_eq!(
            session.state(),
            &SessionState::Connecting {
                peripheral: PeripheralId::from("UUID-1"),
                cached: true
            }
        );
    }

    #[test]
    fn test_shutdown_while_scanning() {
        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(1).return_const(());
        radio.expect_stop_scan().times(1).return_const(());
        radio.expect_disconnect().times(0);

        let (mut session, _rx) = session(radio);
        session.handle_event(RadioEvent::PowerStateChanged(PowerState::On));
        session.shutdown();
        assert_eq!(session.state(), &SessionState::Disconnected);
    }
}
