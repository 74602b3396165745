//! Event dispatcher running a [`CentralSession`] on its own task.
//!
//! The session is moved into one tokio task and never shared: radio events
//! and UI requests both arrive over channels and are applied one at a time.
//! UI output leaves over an unbounded channel so nothing is ever dropped.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ble::btleplug_radio::BtleplugRadio;
use crate::ble::connection::{CentralSession, UiEvent};
use crate::ble::radio::{RadioEvent, RadioStack, WriteMode};
use crate::ble::uuids::CharacteristicId;
use crate::channel::NotifyOutcome;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;

/// Requests from the UI side, applied on the session task.
enum Command {
    SendText {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Write {
        id: CharacteristicId,
        payload: Bytes,
        mode: WriteMode,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        id: CharacteristicId,
        reply: oneshot::Sender<Result<()>>,
    },
    SetNotify {
        enabled: bool,
        reply: oneshot::Sender<NotifyOutcome>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Entry points for starting a session task.
pub struct Central;

impl Central {
    /// Open the system Bluetooth adapter and run a session against it.
    ///
    /// Returns the request handle and the stream of UI events.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn start<S>(
        config: SessionConfig,
        store: S,
    ) -> Result<(CentralHandle, mpsc::UnboundedReceiver<UiEvent>)>
    where
        S: KeyValueStore + Send + 'static,
    {
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let radio = BtleplugRadio::new(radio_tx).await?;
        let session = CentralSession::new(config, radio, store, ui_tx);

        Ok((Self::spawn(session, radio_rx), ui_rx))
    }

    /// Run `session` on a new task, fed by `radio_rx`.
    pub fn spawn<R, S>(
        mut session: CentralSession<R, S>,
        mut radio_rx: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> CentralHandle
    where
        R: RadioStack + Send + 'static,
        S: KeyValueStore + Send + 'static,
    {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            info!("Central session task starting");
            session.start();

            loop {
                tokio::select! {
                    Some(event) = radio_rx.recv() => {
                        session.handle_event(event);
                    }
                    command = command_rx.recv() => {
                        match command {
                            Some(Command::Shutdown) | None => break,
                            Some(command) => Self::apply(&mut session, command),
                        }
                    }
                }
            }

            session.shutdown();
            debug!("Central session task ended");
        });

        CentralHandle {
            commands: command_tx,
            task: Some(task),
        }
    }

    fn apply<R: RadioStack, S: KeyValueStore>(session: &mut CentralSession<R, S>, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::SendText { text, reply } => {
                let _ = reply.send(session.send_text(&text));
            }
            Command::Write {
                id,
                payload,
                mode,
                reply,
            } => {
                let _ = reply.send(session.write(&id, payload, mode));
            }
            Command::Read { id, reply } => {
                let _ = reply.send(session.read(&id));
            }
            Command::SetNotify { enabled, reply } => {
                let _ = reply.send(session.set_notify(enabled));
            }
            Command::Reconnect { reply } => {
                let _ = reply.send(session.reconnect());
            }
            Command::Shutdown => {}
        }
    }
}

/// Request handle for a running session task.
pub struct CentralHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl CentralHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Send text on the data characteristic.
    ///
    /// Fails with [`Error::CharacteristicNotFound`] until the characteristic
    /// has been discovered.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.request(|reply| Command::SendText { text, reply }).await?
    }

    /// Write raw bytes to any discovered characteristic.
    pub async fn write(&self, id: CharacteristicId, payload: Bytes, mode: WriteMode) -> Result<()> {
        self.request(|reply| Command::Write {
            id,
            payload,
            mode,
            reply,
        })
        .await?
    }

    /// Request a read of a characteristic.
    pub async fn read(&self, id: CharacteristicId) -> Result<()> {
        self.request(|reply| Command::Read { id, reply }).await?
    }

    /// Toggle notifications on the data characteristic.
    pub async fn set_notify(&self, enabled: bool) -> Result<NotifyOutcome> {
        self.request(|reply| Command::SetNotify { enabled, reply })
            .await
    }

    /// Restart discovery after a disconnect.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Check if the session task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop the session task and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down central");
        let _ = self.commands.send(Command::Shutdown);

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("session task failed: {}", e)))?;
        }
        Ok(())
    }
}
