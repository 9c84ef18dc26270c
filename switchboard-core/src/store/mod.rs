//! Persistent store contract for messaging sessions.
//!
//! Two implementations share this trait:
//! - [`PgStore`]: PostgreSQL via sqlx, the production backend
//! - [`MemoryStore`]: in-process tables with the same uniqueness rules,
//!   used by tests and `backend = "memory"` development runs
//!
//! Every lookup reachable from a caller-facing operation carries the tenant id.
//! Unique-constraint violations surface as [`SwitchboardError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Result, SwitchboardError};
use crate::models::{AccessGrant, Chat, ChatKind, Message, Session};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Chat upsert keyed by `(session_id, external_id)`.
///
/// On first contact the row is created with `name` and `kind`; afterwards only
/// the last-message fields change and `unread_increment` is added to the counter.
#[derive(Debug, Clone)]
pub struct ChatUpsert {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub kind: ChatKind,
    pub last_message_at: DateTime<Utc>,
    pub last_message_text: String,
    pub unread_increment: i32,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
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
    pub manager_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewGrant {
    pub session_id: Uuid,
    pub manager_id: Uuid,
    pub tenant_id: Uuid,
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage_chats: bool,
    pub granted_by: Uuid,
}

/// Result of a read acknowledgement on one chat.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub marked: u64,
    pub previous_unread: i32,
    pub chat: Chat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatFilter {
    #[serde(default)]
    pub unread_only: bool,
    pub search: Option<String>,
    pub kind: Option<ChatKind>,
}

impl ChatFilter {
    pub fn matches(&self, chat: &Chat) -> bool {
        if self.unread_only && chat.unread_count == 0 {
            return false;
        }
        if let Some(kind) = self.kind {
            if chat.kind != kind {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                chat.name.to_lowercase().contains(&term)
                    || chat.external_id.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }.clamped()
    }

    /// Page numbers start at 1; page size is bounded by [`MAX_PAGE_SIZE`].
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.clamped().per_page as i64
    }

    pub fn offset(&self) -> i64 {
        let p = self.clamped();
        (p.page as i64 - 1) * p.per_page as i64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let request = request.clamped();
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
        }
    }
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    // --- sessions ---

    /// Create an active, unpaired session. The single-active rule is the caller's to enforce.
    async fn insert_session(&self, tenant_id: Uuid, admin_id: Uuid) -> Result<Session>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    async fn get_tenant_session(&self, tenant_id: Uuid, session_id: Uuid)
        -> Result<Option<Session>>;

    async fn active_session_for_tenant(&self, tenant_id: Uuid) -> Result<Option<Session>>;

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<Session>>;

    async fn list_active_sessions(&self) -> Result<Vec<Session>>;

    /// Reuse a stale placeholder: new owner, pairing code cleared, disconnected.
    async fn reset_session(&self, session_id: Uuid, admin_id: Uuid) -> Result<Option<Session>>;

    /// Returns `None` when the session is missing or no longer active.
    async fn set_pairing_code(&self, session_id: Uuid, code: Option<&str>)
        -> Result<Option<Session>>;

    /// Commit a paired identity. `Conflict` if another row of the tenant holds the phone.
    async fn mark_connected(
        &self,
        session_id: Uuid,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Session>>;

    async fn mark_disconnected(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Logical delete: inactive, disconnected, pairing code cleared.
    async fn deactivate_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Hard delete, cascading to chats, messages and grants.
    async fn delete_session(&self, session_id: Uuid) -> Result<bool>;

    /// Every session of the tenant (active or not) holding `phone_number`, except `exclude`.
    async fn find_sessions_by_phone(
        &self,
        tenant_id: Uuid,
        phone_number: &str,
        exclude: Uuid,
    ) -> Result<Vec<Session>>;

    /// Delete inactive placeholders and inactive sessions not updated since `cutoff`.
    async fn purge_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>>;

    // --- chats ---

    async fn upsert_chat(&self, upsert: ChatUpsert) -> Result<Chat>;

    async fn get_chat(&self, tenant_id: Uuid, session_id: Uuid, chat_id: Uuid)
        -> Result<Option<Chat>>;

    async fn list_chats(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        filter: &ChatFilter,
        page: PageRequest,
    ) -> Result<Page<Chat>>;

    /// Flip unread inbound messages to read and zero the counter in one step.
    async fn mark_chat_read(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<ReadResult>>;

    // --- messages ---

    /// Returns `None` when a message with the same external id already exists.
    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>>;

    async fn message_exists(&self, session_id: Uuid, external_id: &str) -> Result<bool>;

    /// Newest first.
    async fn list_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Message>>;

    // --- access grants ---

    async fn upsert_grant(&self, grant: NewGrant) -> Result<AccessGrant>;

    async fn delete_grant(&self, tenant_id: Uuid, session_id: Uuid, manager_id: Uuid)
        -> Result<bool>;

    async fn list_grants(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Vec<AccessGrant>>;

    async fn find_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<Option<AccessGrant>>;
}

/// Build the configured store backend.
///
/// Reads `[database] backend` to select PostgreSQL (default) or the in-process store.
pub async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory store: sessions will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" => {
            let pool = crate::db::create_pool(config).await?;
            crate::db::run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        other => Err(SwitchboardError::Invalid(format!(
            "unknown database backend '{}'",
            other
        ))),
    }
}
