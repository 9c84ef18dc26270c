//! External messaging client contract.
//!
//! One client per session. A client is created by a [`ClientFactory`] together
//! with the receiving half of its event channel; the session's worker drains
//! that channel one event at a time. Pairing artifacts (credentials the client
//! persists after a successful pairing) live under `auth_root/session-{id}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::error::{Result, SwitchboardError};
use crate::models::ChatKind;

pub mod simulated;

pub use simulated::{SimulatedClientFactory, SimulatedDevice};

/// Lifecycle and traffic events emitted by a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Raw pairing payload to render as a scannable code.
    PairingCode(String),
    Authenticated {
        identity: String,
        display_name: Option<String>,
    },
    MessageReceived(IncomingMessage),
    Disconnected {
        reason: String,
    },
}

/// Chat metadata as reported by the messaging network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub external_id: String,
    pub name: Option<String>,
    pub kind: ChatKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub external_id: String,
    pub chat: ChatRef,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    /// Sent from the paired device itself.
    pub from_me: bool,
}

/// Dispatch acknowledgement for an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHandle {
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Start the transport. Pairing or resumption proceeds through events.
    async fn initialize(&self) -> Result<()>;

    async fn send(&self, chat_external_id: &str, body: &str) -> Result<MessageHandle>;

    /// Identity currently paired on the live connection, if any.
    async fn current_identity(&self) -> Option<String>;

    /// Close the transport and release resources.
    async fn destroy(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub session_id: Uuid,
    pub auth_dir: PathBuf,
    /// Reuse existing pairing artifacts instead of requesting a new pairing code.
    pub resume: bool,
    pub event_buffer: usize,
}

pub struct ClientHandle {
    pub client: Arc<dyn MessagingClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, options: ClientOptions) -> Result<ClientHandle>;
}

/// Directory holding the pairing artifacts of one session.
pub fn artifact_dir(root: &Path, session_id: Uuid) -> PathBuf {
    root.join(format!("session-{}", session_id))
}

pub fn has_artifacts(root: &Path, session_id: Uuid) -> bool {
    let dir = artifact_dir(root, session_id);
    std::fs::read_dir(&dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Remove a session's pairing artifacts. Missing directories are not an error.
pub fn remove_artifacts(root: &Path, session_id: Uuid) -> Result<()> {
    let dir = artifact_dir(root, session_id);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create the client factory selected by `[messaging] driver`.
pub fn create_factory(config: &MessagingConfig) -> Result<Arc<dyn ClientFactory>> {
    match config.driver.as_str() {
        "simulated" => Ok(Arc::new(SimulatedClientFactory::new())),
        other => Err(SwitchboardError::Invalid(format!(
            "unknown messaging driver '{}'",
            other
        ))),
    }
}
