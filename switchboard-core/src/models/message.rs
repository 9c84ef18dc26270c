use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub from_me: bool,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    /// Manager who sent it, when it was not sent by the paired device itself.
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
