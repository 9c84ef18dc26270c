//! Realtime Notification Layer
//!
//! Topic fan-out with two scopes: one topic per tenant (every viewer of the
//! company) and one per session (viewers that joined that session). Topics
//! are created lazily on first subscribe and dropped once a publish finds no
//! receivers left.
//!
//! Routing:
//! - session status → tenant topic and session topic
//! - chat updated, new message → session topic only
//!
//! Store mutations never publish by themselves. Pipeline functions return an
//! [`Applied`] value carrying the notifications, and the caller publishes them
//! after the write has committed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use switchboard_core::ipc::{EventKind, RealtimeEvent};
use switchboard_core::models::{Chat, Message, Session, SessionState};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Tenant(Uuid),
    Session(Uuid),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Tenant(id) => write!(f, "tenant:{}", id),
            Topic::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// Payload of a `session_status` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub connected: bool,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    /// Scannable pairing code as a data URL, while awaiting pairing.
    pub pairing_image: Option<String>,
    pub reason: Option<String>,
}

impl SessionStatus {
    pub fn of(session: &Session) -> Self {
        Self {
            state: session.state(),
            connected: session.is_connected,
            phone_number: session.phone_number.clone(),
            display_name: session.display_name.clone(),
            pairing_image: session.pairing_code.clone(),
            reason: None,
        }
    }

    pub fn destroyed(reason: impl Into<String>) -> Self {
        Self {
            state: SessionState::Destroyed,
            connected: false,
            phone_number: None,
            display_name: None,
            pairing_image: None,
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    SessionStatus {
        session_id: Uuid,
        tenant_id: Uuid,
        status: SessionStatus,
    },
    ChatUpdated(Chat),
    NewMessage {
        chat: Chat,
        message: Message,
    },
}

impl Notification {
    pub fn status(session: &Session) -> Self {
        Self::SessionStatus {
            session_id: session.id,
            tenant_id: session.tenant_id,
            status: SessionStatus::of(session),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Notification::SessionStatus { .. } => EventKind::SessionStatus,
            Notification::ChatUpdated(_) => EventKind::ChatUpdated,
            Notification::NewMessage { .. } => EventKind::NewMessage,
        }
    }

    pub fn topics(&self) -> Vec<Topic> {
        match self {
            Notification::SessionStatus {
                session_id,
                tenant_id,
                ..
            } => vec![Topic::Session(*session_id), Topic::Tenant(*tenant_id)],
            Notification::ChatUpdated(chat) => vec![Topic::Session(chat.session_id)],
            Notification::NewMessage { chat, .. } => vec![Topic::Session(chat.session_id)],
        }
    }

    pub fn to_event(&self) -> RealtimeEvent {
        let (session_id, tenant_id, payload) = match self {
            Notification::SessionStatus {
                session_id,
                tenant_id,
                status,
            } => (*session_id, *tenant_id, serde_json::json!(status)),
            Notification::ChatUpdated(chat) => {
                (chat.session_id, chat.tenant_id, serde_json::json!(chat))
            }
            Notification::NewMessage { chat, message } => (
                chat.session_id,
                chat.tenant_id,
                serde_json::json!({
                    "chat_id": chat.id,
                    "message": message,
                }),
            ),
        };
        RealtimeEvent {
            event: self.kind(),
            session_id,
            tenant_id,
            payload,
        }
    }
}

/// Result of a committed mutation plus the notifications it owes.
#[must_use = "the notifications must be published"]
#[derive(Debug)]
pub struct Applied<T> {
    pub value: T,
    pub notifications: Vec<Notification>,
}

impl<T> Applied<T> {
    pub fn new(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }

    pub fn quiet(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub async fn publish(self, notifier: &Notifier) -> T {
        notifier.publish_all(&self.notifications).await;
        self.value
    }
}

#[derive(Clone)]
pub struct Notifier {
    topics: Arc<RwLock<HashMap<Topic, broadcast::Sender<RealtimeEvent>>>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<RealtimeEvent> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver to every topic the notification routes to. Returns the number
    /// of receivers reached.
    pub async fn publish(&self, notification: &Notification) -> usize {
        let event = notification.to_event();
        let mut delivered = 0;
        for topic in notification.topics() {
            delivered += self.send(topic, event.clone()).await;
        }
        tracing::debug!(
            event = ?event.event,
            session_id = %event.session_id,
            receivers = delivered,
            "Published notification"
        );
        delivered
    }

    pub async fn publish_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.publish(notification).await;
        }
    }

    pub async fn publish_session_status(&self, session: &Session) -> usize {
        self.publish(&Notification::status(session)).await
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    async fn send(&self, topic: Topic, event: RealtimeEvent) -> usize {
        let sender = self.topics.read().await.get(&topic).cloned();
        let Some(sender) = sender else {
            return 0;
        };
        match sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                self.release(topic).await;
                0
            }
        }
    }

    /// Forget `topic` if nobody listens any more.
    pub async fn release(&self, topic: Topic) {
        let mut topics = self.topics.write().await;
        if topics.get(&topic).is_some_and(|s| s.receiver_count() == 0) {
            topics.remove(&topic);
            tracing::debug!(topic = %topic, "Dropped idle topic");
        }
    }
}
