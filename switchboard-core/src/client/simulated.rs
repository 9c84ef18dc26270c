//! Simulated messaging driver.
//!
//! Stands in for the external messaging network: every created client gets a
//! [`SimulatedDevice`] that plays the phone's side of the conversation
//! (showing a pairing code, completing the pairing, delivering messages,
//! dropping the connection). Pairing writes a credentials file into the
//! session's artifact directory, so resumption behaves like a real driver.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{
    ClientEvent, ClientFactory, ClientHandle, ClientOptions, IncomingMessage, MessageHandle,
    MessagingClient,
};
use crate::error::{Result, SwitchboardError};

const CREDENTIALS_FILE: &str = "creds.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_external_id: String,
    pub body: String,
    pub external_id: String,
}

#[derive(Default)]
struct DeviceState {
    identity: Option<String>,
    connected: bool,
    initialized: bool,
    destroyed: bool,
    fail_sends: bool,
    sent: Vec<SentMessage>,
}

/// Test-side handle to one simulated client.
#[derive(Clone)]
pub struct SimulatedDevice {
    session_id: Uuid,
    auth_dir: PathBuf,
    events: mpsc::Sender<ClientEvent>,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn emit(&self, event: ClientEvent) -> Result<()> {
        self.events.send(event).await.map_err(|_| {
            SwitchboardError::Client(format!(
                "event channel for session {} is closed",
                self.session_id
            ))
        })
    }

    pub async fn show_pairing_code(&self, code: &str) -> Result<()> {
        self.emit(ClientEvent::PairingCode(code.to_string())).await
    }

    /// Complete pairing: persist credentials, then report the identity.
    pub async fn authenticate(&self, identity: &str, display_name: Option<&str>) -> Result<()> {
        std::fs::create_dir_all(&self.auth_dir)?;
        let creds = serde_json::json!({
            "identity": identity,
            "display_name": display_name,
        });
        std::fs::write(self.auth_dir.join(CREDENTIALS_FILE), creds.to_string())?;
        {
            let mut state = self.state.lock().await;
            state.identity = Some(identity.to_string());
            state.connected = true;
        }
        self.emit(ClientEvent::Authenticated {
            identity: identity.to_string(),
            display_name: display_name.map(str::to_string),
        })
        .await
    }

    pub async fn receive(&self, message: IncomingMessage) -> Result<()> {
        self.emit(ClientEvent::MessageReceived(message)).await
    }

    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        self.state.lock().await.connected = false;
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn set_fail_sends(&self, fail: bool) {
        self.state.lock().await.fail_sends = fail;
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn is_destroyed(&self) -> bool {
        self.state.lock().await.destroyed
    }
}

struct SimulatedClient {
    device: SimulatedDevice,
    resume: bool,
    fail_init: bool,
}

#[async_trait]
impl MessagingClient for SimulatedClient {
    async fn initialize(&self) -> Result<()> {
        if self.fail_init {
            return Err(SwitchboardError::Client(
                "simulated transport failed to start".to_string(),
            ));
        }
        self.device.state.lock().await.initialized = true;

        if self.resume {
            let raw = std::fs::read_to_string(self.device.auth_dir.join(CREDENTIALS_FILE))?;
            let creds: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| SwitchboardError::Client(format!("corrupt credentials: {}", e)))?;
            let identity = creds["identity"]
                .as_str()
                .ok_or_else(|| SwitchboardError::Client("credentials lack identity".to_string()))?
                .to_string();
            let display_name = creds["display_name"].as_str().map(str::to_string);
            {
                let mut state = self.device.state.lock().await;
                state.identity = Some(identity.clone());
                state.connected = true;
            }
            self.device
                .emit(ClientEvent::Authenticated {
                    identity,
                    display_name,
                })
                .await?;
        }
        Ok(())
    }

    async fn send(&self, chat_external_id: &str, body: &str) -> Result<MessageHandle> {
        let mut state = self.device.state.lock().await;
        if state.destroyed || !state.connected {
            return Err(SwitchboardError::Client("device is not connected".to_string()));
        }
        if state.fail_sends {
            return Err(SwitchboardError::Client("simulated send failure".to_string()));
        }
        let handle = MessageHandle {
            external_id: format!("sim-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
        };
        state.sent.push(SentMessage {
            chat_external_id: chat_external_id.to_string(),
            body: body.to_string(),
            external_id: handle.external_id.clone(),
        });
        Ok(handle)
    }

    async fn current_identity(&self) -> Option<String> {
        self.device.state.lock().await.identity.clone()
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.device.state.lock().await;
        state.destroyed = true;
        state.connected = false;
        Ok(())
    }
}

/// Factory for simulated clients; keeps the latest device per session.
#[derive(Default)]
pub struct SimulatedClientFactory {
    devices: Mutex<HashMap<Uuid, SimulatedDevice>>,
    fail_next_init: Mutex<bool>,
}

impl SimulatedClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn device(&self, session_id: Uuid) -> Option<SimulatedDevice> {
        self.devices.lock().await.get(&session_id).cloned()
    }

    /// Make the next created client fail during `initialize`.
    pub async fn fail_next_init(&self) {
        *self.fail_next_init.lock().await = true;
    }
}

#[async_trait]
impl ClientFactory for SimulatedClientFactory {
    async fn create(&self, options: ClientOptions) -> Result<ClientHandle> {
        let (tx, rx) = mpsc::channel(options.event_buffer.max(1));
        let device = SimulatedDevice {
            session_id: options.session_id,
            auth_dir: options.auth_dir,
            events: tx,
            state: Arc::new(Mutex::new(DeviceState::default())),
        };
        let fail_init = std::mem::take(&mut *self.fail_next_init.lock().await);

        self.devices
            .lock()
            .await
            .insert(options.session_id, device.clone());

        Ok(ClientHandle {
            client: Arc::new(SimulatedClient {
                device,
                resume: options.resume,
                fail_init,
            }),
            events: rx,
        })
    }
}
