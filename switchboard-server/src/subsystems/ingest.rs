//! Message Ingestion Pipeline
//!
//! Inbound: filter by chat kind, drop duplicate deliveries, upsert the owning
//! chat (bumping `unread_count` for messages not sent by the paired device),
//! then persist the message.
//!
//! Outbound: called only after the client acknowledged the dispatch. Records
//! the message as own and read, attributed to the sending manager if any.
//!
//! Read acknowledgement: marks the chat's unread inbound messages read and
//! zeroes its counter; reports "nothing unread" distinctly.

use switchboard_core::client::{IncomingMessage, MessageHandle};
use switchboard_core::config::IngestConfig;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::models::{Chat, ChatKind, Message, Session};
use switchboard_core::store::{ChatUpsert, NewMessage};
use switchboard_core::Store;
use uuid::Uuid;

use super::notify::{Applied, Notification};

/// Longest `last_message_text` kept on a chat.
const PREVIEW_CHARS: usize = 280;

#[derive(Debug, Clone)]
pub struct IngestPolicy {
    pub ignore_groups: bool,
    pub ignore_status: bool,
    pub max_body_length: usize,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestPolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            ignore_groups: config.ignore_groups,
            ignore_status: config.ignore_status,
            max_body_length: config.max_body_length,
        }
    }
}

impl IngestPolicy {
    pub fn accepts(&self, kind: ChatKind) -> bool {
        match kind {
            ChatKind::Individual => true,
            ChatKind::Group => !self.ignore_groups,
            ChatKind::Status => !self.ignore_status,
        }
    }

    /// Outbound bodies must have visible content and fit the configured length.
    pub fn validate_body(&self, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(SwitchboardError::Invalid("message body is empty".to_string()));
        }
        let length = body.chars().count();
        if length > self.max_body_length {
            return Err(SwitchboardError::Invalid(format!(
                "message body has {} characters, limit is {}",
                length, self.max_body_length
            )));
        }
        Ok(())
    }
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

fn chat_name(incoming: &IncomingMessage) -> String {
    let reported = incoming
        .chat
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(name) = reported {
        return name.to_string();
    }
    if incoming.chat.kind == ChatKind::Individual && !incoming.from_me {
        if let Some(sender) = incoming.sender_name.as_deref().filter(|n| !n.is_empty()) {
            return sender.to_string();
        }
    }
    incoming.chat.external_id.clone()
}

/// Persist one message reported by the client. `None` when it was filtered
/// out or already stored.
pub async fn ingest_incoming(
    store: &dyn Store,
    policy: &IngestPolicy,
    session: &Session,
    incoming: IncomingMessage,
) -> Result<Option<Applied<Message>>> {
    if !policy.accepts(incoming.chat.kind) {
        tracing::debug!(
            session_id = %session.id,
            chat = %incoming.chat.external_id,
            kind = %incoming.chat.kind,
            "Ignoring message from filtered chat kind"
        );
        return Ok(None);
    }
    if store.message_exists(session.id, &incoming.external_id).await? {
        tracing::debug!(
            session_id = %session.id,
            external_id = %incoming.external_id,
            "Duplicate delivery dropped"
        );
        return Ok(None);
    }

    let chat = store
        .upsert_chat(ChatUpsert {
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: incoming.chat.external_id.clone(),
            name: chat_name(&incoming),
            kind: incoming.chat.kind,
            last_message_at: incoming.timestamp,
            last_message_text: preview(&incoming.body),
            unread_increment: if incoming.from_me { 0 } else { 1 },
        })
        .await?;

    let stored = store
        .insert_message(NewMessage {
            chat_id: chat.id,
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: incoming.external_id,
            from_me: incoming.from_me,
            sender_id: incoming.sender_id,
            sender_name: incoming.sender_name,
            body: incoming.body,
            message_type: incoming.message_type,
            sent_at: incoming.timestamp,
            manager_id: None,
        })
        .await?;

    let Some(message) = stored else {
        // Lost a race with a concurrent delivery of the same message.
        return Ok(None);
    };

    let notifications = vec![
        Notification::NewMessage {
            chat: chat.clone(),
            message: message.clone(),
        },
        Notification::ChatUpdated(chat),
    ];
    Ok(Some(Applied::new(message, notifications)))
}

/// Record an outbound message the client has acknowledged.
///
/// The value is `None` if the client already echoed the message back as an
/// inbound event and it was stored from there.
pub async fn record_outbound(
    store: &dyn Store,
    session: &Session,
    chat: &Chat,
    handle: MessageHandle,
    body: &str,
    manager_id: Option<Uuid>,
) -> Result<Applied<Option<Message>>> {
    let updated = store
        .upsert_chat(ChatUpsert {
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: chat.external_id.clone(),
            name: chat.name.clone(),
            kind: chat.kind,
            last_message_at: handle.timestamp,
            last_message_text: preview(body),
            unread_increment: 0,
        })
        .await?;

    let stored = store
        .insert_message(NewMessage {
            chat_id: updated.id,
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: handle.external_id,
            from_me: true,
            sender_id: session.phone_number.clone().unwrap_or_default(),
            sender_name: session.display_name.clone(),
            body: body.to_string(),
            message_type: "text".to_string(),
            sent_at: handle.timestamp,
            manager_id,
        })
        .await?;

    let mut notifications = Vec::with_capacity(2);
    if let Some(message) = &stored {
        notifications.push(Notification::NewMessage {
            chat: updated.clone(),
            message: message.clone(),
        });
    }
    notifications.push(Notification::ChatUpdated(updated));
    Ok(Applied::new(stored, notifications))
}

#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Marked { count: u64, chat: Chat },
    NothingUnread { chat: Chat },
}

impl ReadOutcome {
    pub fn marked_count(&self) -> u64 {
        match self {
            ReadOutcome::Marked { count, .. } => *count,
            ReadOutcome::NothingUnread { .. } => 0,
        }
    }

    pub fn chat(&self) -> &Chat {
        match self {
            ReadOutcome::Marked { chat, .. } | ReadOutcome::NothingUnread { chat } => chat,
        }
    }
}

pub async fn acknowledge_read(
    store: &dyn Store,
    tenant_id: Uuid,
    session_id: Uuid,
    chat_id: Uuid,
) -> Result<Applied<ReadOutcome>> {
    let result = store
        .mark_chat_read(tenant_id, session_id, chat_id)
        .await?
        .ok_or_else(|| SwitchboardError::NotFound(format!("chat {}", chat_id)))?;

    if result.marked == 0 && result.previous_unread == 0 {
        return Ok(Applied::quiet(ReadOutcome::NothingUnread { chat: result.chat }));
    }

    let notification = Notification::ChatUpdated(result.chat.clone());
    Ok(Applied::new(
        ReadOutcome::Marked {
            count: result.marked,
            chat: result.chat,
        },
        vec![notification],
    ))
}
