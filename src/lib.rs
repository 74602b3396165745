//! # gatt-central
//!
//! A Bluetooth Low Energy GATT central that finds one known peripheral,
//! remembers it, and exchanges text with it over a single characteristic.
//!
//! ## Features
//!
//! - **Remembered peripheral**: the first device advertising the expected
//!   name is stored, and later sessions connect to it directly without
//!   scanning
//! - **Full discovery**: every service and characteristic is indexed on each
//!   connection, and forgotten again on disconnect
//! - **Data channel**: write, read and notify by characteristic id, with
//!   inbound UTF-8 text forwarded to the UI
//! - **Testable core**: the state machine consumes [`RadioEvent`]s and calls
//!   a [`RadioStack`] trait, so it runs without hardware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatt_central::{Central, FileStore, Result, SessionConfig, SessionState, UiEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = FileStore::new("/tmp/gatt-central");
//!     let (central, mut events) = Central::start(SessionConfig::default(), store).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             UiEvent::TextReceived(text) => println!("<< {}", text),
//!             UiEvent::StateChanged(SessionState::Ready) => {
//!                 let _ = central.send_text("hello").await;
//!             }
//!             UiEvent::StateChanged(_) => {}
//!         }
//!     }
//!
//!     central.shutdown().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

pub mod ble;
pub mod central;
pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod storage;

pub use central::{Central, CentralHandle};
pub use channel::{DataChannel, NotifyOutcome};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use identity::{IdentityCache, PeripheralIdentity};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

pub use ble::{
    BtleplugRadio, CentralSession, CharacteristicHandle, CharacteristicId,
    CharacteristicProperties, CharacteristicRegistry, DiscoveredDevice, PeripheralHandle,
    PeripheralId, PowerState, RadioEvent, RadioStack, ServiceDescriptor, SessionState, UiEvent,
    WriteMode,
};
