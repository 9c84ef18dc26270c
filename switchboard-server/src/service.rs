//! Caller-facing session operations.
//!
//! Every entrypoint (realtime socket, HTTP) goes through [`SessionService`],
//! which resolves the caller's capabilities before touching the controller or
//! the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_core::client::ClientFactory;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::ipc::RealtimeEvent;
use switchboard_core::models::{AccessGrant, Caller, Capabilities, Chat, Message, Session, SessionState};
use switchboard_core::store::{ChatFilter, NewGrant, Page, PageRequest};
use switchboard_core::{Store, SwitchboardConfig};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::subsystems::access::{self, Capability};
use crate::subsystems::ingest;
use crate::subsystems::lifecycle::SessionController;
use crate::subsystems::notify::{Notifier, Topic};

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub state: SessionState,
    /// A client for this session runs in this process.
    pub live: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairingArtifact {
    pub session_id: Uuid,
    pub state: SessionState,
    pub connected: bool,
    pub pairing_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub external_id: String,
    pub sent_at: DateTime<Utc>,
    /// `None` if the client's echo of the message was stored first.
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadReceipt {
    pub chat_id: Uuid,
    pub marked_count: u64,
}

#[derive(Clone)]
pub struct SessionService {
    controller: SessionController,
    send_timeout: Duration,
}

impl SessionService {
    pub fn new(controller: SessionController, config: &SwitchboardConfig) -> Self {
        Self {
            controller,
            send_timeout: Duration::from_secs(config.messaging.send_timeout_seconds.max(1)),
        }
    }

    /// Wire a controller, registry and notifier around the given backends.
    pub fn from_parts(
        store: Arc<dyn Store>,
        factory: Arc<dyn ClientFactory>,
        config: &SwitchboardConfig,
    ) -> Self {
        let notifier = Notifier::new(config.realtime.channel_capacity);
        let controller = SessionController::new(store, factory, notifier, config);
        Self::new(controller, config)
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    fn store(&self) -> &dyn Store {
        self.controller.store().as_ref()
    }

    async fn view(&self, session: Session) -> SessionView {
        let live = self.controller.registry().contains(session.id).await;
        SessionView {
            state: session.state(),
            session,
            live,
        }
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn create_session(&self, caller: &Caller) -> Result<SessionView> {
        if !caller.is_admin() {
            return Err(SwitchboardError::Forbidden(
                "only tenant administrators can open sessions".to_string(),
            ));
        }
        let session = self
            .controller
            .create_session(caller.tenant_id, caller.id)
            .await?;
        Ok(self.view(session).await)
    }

    /// Repeating a destroy succeeds, also once the cleanup pass purged the row.
    pub async fn destroy_session(&self, caller: &Caller, session_id: Uuid) -> Result<()> {
        match access::require_admin(self.store(), session_id, caller).await {
            Ok(_) => self.controller.destroy_session(session_id).await,
            Err(SwitchboardError::NotFound(message)) => {
                let retired = self.controller.registry().retired_tenant(session_id).await;
                if retired == Some(caller.tenant_id) {
                    Ok(())
                } else {
                    Err(SwitchboardError::NotFound(message))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Administrators see every session of the tenant, managers only the ones
    /// they may read.
    pub async fn list_sessions(&self, caller: &Caller) -> Result<Vec<SessionView>> {
        let sessions = self.store().list_sessions(caller.tenant_id).await?;
        let mut views = Vec::with_capacity(sessions.len());
        for session in sessions {
            if !caller.is_admin()
                && !self
                    .store()
                    .find_grant(caller.tenant_id, session.id, caller.id)
                    .await?
                    .is_some_and(|grant| grant.can_read)
            {
                continue;
            }
            views.push(self.view(session).await);
        }
        Ok(views)
    }

    pub async fn get_pairing_artifact(
        &self,
        caller: &Caller,
        session_id: Uuid,
    ) -> Result<PairingArtifact> {
        access::require(self.store(), session_id, caller, Capability::Read).await?;
        let session = self
            .store()
            .get_tenant_session(caller.tenant_id, session_id)
            .await?
            .ok_or_else(|| SwitchboardError::NotFound(format!("session {}", session_id)))?;
        let connected = match self.controller.registry().state(session_id).await {
            Some(live) => live.connected,
            None => session.is_connected,
        };
        Ok(PairingArtifact {
            session_id,
            state: session.state(),
            connected,
            pairing_image: session.pairing_code,
        })
    }

    // ------------------------------------------------------------------------
    // Access grants
    // ------------------------------------------------------------------------

    pub async fn grant_access(
        &self,
        caller: &Caller,
        session_id: Uuid,
        manager_id: Uuid,
        capabilities: Capabilities,
    ) -> Result<AccessGrant> {
        let session = access::require_admin(self.store(), session_id, caller).await?;
        if !session.is_active {
            return Err(SwitchboardError::Invalid(format!(
                "session {} is destroyed",
                session_id
            )));
        }
        let grant = self
            .store()
            .upsert_grant(NewGrant {
                session_id,
                manager_id,
                tenant_id: caller.tenant_id,
                can_read: capabilities.read,
                can_write: capabilities.write,
                can_manage_chats: capabilities.manage_chats,
                granted_by: caller.id,
            })
            .await?;
        tracing::info!(session_id = %session_id, manager_id = %manager_id, "Access granted");
        Ok(grant)
    }

    pub async fn revoke_access(&self, caller: &Caller, session_id: Uuid, manager_id: Uuid) -> Result<()> {
        access::require_admin(self.store(), session_id, caller).await?;
        if self
            .store()
            .delete_grant(caller.tenant_id, session_id, manager_id)
            .await?
        {
            tracing::info!(session_id = %session_id, manager_id = %manager_id, "Access revoked");
            Ok(())
        } else {
            Err(SwitchboardError::NotFound(format!(
                "grant for manager {} on session {}",
                manager_id, session_id
            )))
        }
    }

    pub async fn list_access(&self, caller: &Caller, session_id: Uuid) -> Result<Vec<AccessGrant>> {
        access::require_admin(self.store(), session_id, caller).await?;
        self.store().list_grants(caller.tenant_id, session_id).await
    }

    // ------------------------------------------------------------------------
    // Chats and messages
    // ------------------------------------------------------------------------

    pub async fn list_chats(
        &self,
        caller: &Caller,
        session_id: Uuid,
        filter: &ChatFilter,
        page: PageRequest,
    ) -> Result<Page<Chat>> {
        access::require(self.store(), session_id, caller, Capability::Read).await?;
        self.store()
            .list_chats(caller.tenant_id, session_id, filter, page.clamped())
            .await
    }

    /// Newest first. A manager opening a chat acknowledges what they read.
    pub async fn list_messages(
        &self,
        caller: &Caller,
        session_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Message>> {
        access::require(self.store(), session_id, caller, Capability::Read).await?;
        self.chat(caller, session_id, chat_id).await?;
        let messages = self
            .store()
            .list_messages(caller.tenant_id, session_id, chat_id, page.clamped())
            .await?;

        if !caller.is_admin() {
            ingest::acknowledge_read(self.store(), caller.tenant_id, session_id, chat_id)
                .await
                .inspect_err(|e| {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Read acknowledgement failed");
                })?
                .publish(self.controller.notifier())
                .await;
        }
        Ok(messages)
    }

    /// Dispatch through the live client; persisted only once the client acknowledged.
    pub async fn send_message(
        &self,
        caller: &Caller,
        session_id: Uuid,
        chat_id: Uuid,
        body: &str,
    ) -> Result<SendReceipt> {
        access::require(self.store(), session_id, caller, Capability::Write).await?;
        self.controller.policy().validate_body(body)?;

        let session = self
            .store()
            .get_tenant_session(caller.tenant_id, session_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| SwitchboardError::NotFound(format!("session {}", session_id)))?;

        let registry = self.controller.registry();
        let connected = registry
            .state(session_id)
            .await
            .is_some_and(|live| live.connected);
        let client = match registry.client(session_id).await {
            Some(client) if connected => client,
            _ => {
                return Err(SwitchboardError::Unavailable(format!(
                    "session {} is not connected",
                    session_id
                )));
            }
        };

        let chat = self.chat(caller, session_id, chat_id).await?;

        let handle = match tokio::time::timeout(self.send_timeout, client.send(&chat.external_id, body)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, chat_id = %chat_id, error = %e, "Send failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, chat_id = %chat_id, "Send timed out");
                return Err(SwitchboardError::Client(format!(
                    "send timed out after {}s",
                    self.send_timeout.as_secs()
                )));
            }
        };

        let external_id = handle.external_id.clone();
        let sent_at = handle.timestamp;
        let manager_id = (!caller.is_admin()).then_some(caller.id);
        let message = ingest::record_outbound(self.store(), &session, &chat, handle, body, manager_id)
            .await?
            .publish(self.controller.notifier())
            .await;

        Ok(SendReceipt {
            external_id,
            sent_at,
            message,
        })
    }

    pub async fn mark_chat_read(
        &self,
        caller: &Caller,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<ReadReceipt> {
        access::require(self.store(), session_id, caller, Capability::ManageChats).await?;
        let outcome = ingest::acknowledge_read(self.store(), caller.tenant_id, session_id, chat_id)
            .await?
            .publish(self.controller.notifier())
            .await;
        Ok(ReadReceipt {
            chat_id,
            marked_count: outcome.marked_count(),
        })
    }

    async fn chat(&self, caller: &Caller, session_id: Uuid, chat_id: Uuid) -> Result<Chat> {
        self.store()
            .get_chat(caller.tenant_id, session_id, chat_id)
            .await?
            .ok_or_else(|| SwitchboardError::NotFound(format!("chat {}", chat_id)))
    }

    // ------------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------------

    /// Company-wide stream for the caller's tenant.
    pub async fn subscribe_tenant(&self, caller: &Caller) -> broadcast::Receiver<RealtimeEvent> {
        self.controller
            .notifier()
            .subscribe(Topic::Tenant(caller.tenant_id))
            .await
    }

    /// Session stream; requires read access.
    pub async fn join_session(
        &self,
        caller: &Caller,
        session_id: Uuid,
    ) -> Result<broadcast::Receiver<RealtimeEvent>> {
        access::require(self.store(), session_id, caller, Capability::Read).await?;
        Ok(self
            .controller
            .notifier()
            .subscribe(Topic::Session(session_id))
            .await)
    }

    /// Called after the caller dropped its session subscription.
    pub async fn leave_session(&self, session_id: Uuid) {
        self.controller
            .notifier()
            .release(Topic::Session(session_id))
            .await;
    }
}
