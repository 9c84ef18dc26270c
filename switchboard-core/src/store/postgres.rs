use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ChatFilter, ChatUpsert, NewGrant, NewMessage, Page, PageRequest, ReadResult, Store};
use crate::error::{Result, SwitchboardError};
use crate::models::{AccessGrant, Chat, ChatKind, Message, Session};

const SESSION_COLUMNS: &str = "id, tenant_id, admin_id, phone_number, display_name, is_active, \
     is_connected, pairing_code, last_seen_at, created_at, updated_at";

const CHAT_COLUMNS: &str = "id, session_id, tenant_id, external_id, name, kind, last_message_at, \
     last_message_text, unread_count, created_at";

const MESSAGE_COLUMNS: &str = "id, chat_id, session_id, tenant_id, external_id, from_me, sender_id, \
     sender_name, body, message_type, sent_at, is_read, manager_id, created_at";

const GRANT_COLUMNS: &str = "session_id, manager_id, tenant_id, can_read, can_write, \
     can_manage_chats, granted_by, granted_at";

/// Chat row as stored; `kind` is TEXT in the schema.
#[derive(sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    session_id: Uuid,
    tenant_id: Uuid,
    external_id: String,
    name: String,
    kind: String,
    last_message_at: Option<DateTime<Utc>>,
    last_message_text: Option<String>,
    unread_count: i32,
    created_at: DateTime<Utc>,
}

impl From<ChatRow> for Chat {
    fn from(row: ChatRow) -> Self {
        let kind = row.kind.parse().unwrap_or_else(|e: String| {
            tracing::warn!(chat_id = %row.id, error = %e, "Unknown chat kind, treating as individual");
            ChatKind::Individual
        });
        Chat {
            id: row.id,
            session_id: row.session_id,
            tenant_id: row.tenant_id,
            external_id: row.external_id,
            name: row.name,
            kind,
            last_message_at: row.last_message_at,
            last_message_text: row.last_message_text,
            unread_count: row.unread_count,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn update_session(&self, sql: &str, session_id: Uuid) -> Result<Option<Session>> {
        sqlx::query_as::<_, Session>(sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_session(&self, tenant_id: Uuid, admin_id: Uuid) -> Result<Session> {
        let sql = format!(
            "INSERT INTO messaging_sessions (id, tenant_id, admin_id) VALUES ($1, $2, $3) RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(admin_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM messaging_sessions WHERE id = $1", SESSION_COLUMNS);
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_tenant_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM messaging_sessions WHERE id = $1 AND tenant_id = $2",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn active_session_for_tenant(&self, tenant_id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM messaging_sessions WHERE tenant_id = $1 AND is_active LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM messaging_sessions WHERE tenant_id = $1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM messaging_sessions WHERE is_active ORDER BY created_at ASC",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql).fetch_all(&self.pool).await?)
    }

    async fn reset_session(&self, session_id: Uuid, admin_id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "UPDATE messaging_sessions
             SET admin_id = $2, pairing_code = NULL, is_connected = FALSE, updated_at = NOW()
             WHERE id = $1 AND is_active
             RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .bind(admin_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn set_pairing_code(
        &self,
        session_id: Uuid,
        code: Option<&str>,
    ) -> Result<Option<Session>> {
        let sql = format!(
            "UPDATE messaging_sessions SET pairing_code = $2, updated_at = NOW()
             WHERE id = $1 AND is_active
             RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn mark_connected(
        &self,
        session_id: Uuid,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Session>> {
        let sql = format!(
            "UPDATE messaging_sessions
             SET phone_number = $2, display_name = COALESCE($3, display_name),
                 is_connected = TRUE, pairing_code = NULL,
                 last_seen_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND is_active
             RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .bind(phone_number)
            .bind(display_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn mark_disconnected(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "UPDATE messaging_sessions
             SET is_connected = FALSE, last_seen_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND is_active
             RETURNING {}",
            SESSION_COLUMNS
        );
        self.update_session(&sql, session_id).await
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sql = format!(
            "UPDATE messaging_sessions
             SET is_active = FALSE, is_connected = FALSE, pairing_code = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            SESSION_COLUMNS
        );
        self.update_session(&sql, session_id).await
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messaging_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_sessions_by_phone(
        &self,
        tenant_id: Uuid,
        phone_number: &str,
        exclude: Uuid,
    ) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM messaging_sessions
             WHERE tenant_id = $1 AND phone_number = $2 AND id <> $3",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(tenant_id)
            .bind(phone_number)
            .bind(exclude)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn purge_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        let sql = format!(
            "DELETE FROM messaging_sessions
             WHERE NOT is_active AND (phone_number IS NULL OR updated_at < $1)
             RETURNING {}",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn upsert_chat(&self, upsert: ChatUpsert) -> Result<Chat> {
        let sql = format!(
            "INSERT INTO messaging_chats
                (id, session_id, tenant_id, external_id, name, kind,
                 last_message_at, last_message_text, unread_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (session_id, external_id) DO UPDATE SET
                last_message_at = EXCLUDED.last_message_at,
                last_message_text = EXCLUDED.last_message_text,
                unread_count = messaging_chats.unread_count + EXCLUDED.unread_count
             RETURNING {}",
            CHAT_COLUMNS
        );
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(upsert.session_id)
            .bind(upsert.tenant_id)
            .bind(&upsert.external_id)
            .bind(&upsert.name)
            .bind(upsert.kind.as_str())
            .bind(upsert.last_message_at)
            .bind(&upsert.last_message_text)
            .bind(upsert.unread_increment)
            .fetch_one(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)?;
        Ok(row.into())
    }

    async fn get_chat(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<Chat>> {
        let sql = format!(
            "SELECT {} FROM messaging_chats WHERE id = $1 AND session_id = $2 AND tenant_id = $3",
            CHAT_COLUMNS
        );
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(chat_id)
            .bind(session_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Chat::from))
    }

    async fn list_chats(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        filter: &ChatFilter,
        page: PageRequest,
    ) -> Result<Page<Chat>> {
        const WHERE: &str = "WHERE tenant_id = $1 AND session_id = $2
              AND ($3::bool = FALSE OR unread_count > 0)
              AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%' OR external_id ILIKE '%' || $4 || '%')
              AND ($5::text IS NULL OR kind = $5)";

        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let kind = filter.kind.map(|k| k.as_str());

        let count_sql = format!("SELECT COUNT(*)::bigint FROM messaging_chats {}", WHERE);
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(tenant_id)
            .bind(session_id)
            .bind(filter.unread_only)
            .bind(search)
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM messaging_chats {}
             ORDER BY last_message_at DESC NULLS LAST, created_at DESC
             LIMIT $6 OFFSET $7",
            CHAT_COLUMNS, WHERE
        );
        let rows = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(tenant_id)
            .bind(session_id)
            .bind(filter.unread_only)
            .bind(search)
            .bind(kind)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(Chat::from).collect(),
            total,
            page,
        ))
    }

    async fn mark_chat_read(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<ReadResult>> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i32> = sqlx::query_scalar(
            "SELECT unread_count FROM messaging_chats
             WHERE id = $1 AND session_id = $2 AND tenant_id = $3
             FOR UPDATE",
        )
        .bind(chat_id)
        .bind(session_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(previous_unread) = previous else {
            return Ok(None);
        };

        let marked = sqlx::query(
            "UPDATE messaging_messages SET is_read = TRUE
             WHERE chat_id = $1 AND NOT from_me AND NOT is_read",
        )
        .bind(chat_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sql = format!(
            "UPDATE messaging_chats SET unread_count = 0 WHERE id = $1 RETURNING {}",
            CHAT_COLUMNS
        );
        let row = sqlx::query_as::<_, ChatRow>(&sql)
            .bind(chat_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(ReadResult {
            marked,
            previous_unread,
            chat: row.into(),
        }))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>> {
        let sql = format!(
            "INSERT INTO messaging_messages
                (id, chat_id, session_id, tenant_id, external_id, from_me, sender_id,
                 sender_name, body, message_type, sent_at, is_read, manager_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (session_id, external_id) DO NOTHING
             RETURNING {}",
            MESSAGE_COLUMNS
        );
        sqlx::query_as::<_, Message>(&sql)
            .bind(Uuid::new_v4())
            .bind(message.chat_id)
            .bind(message.session_id)
            .bind(message.tenant_id)
            .bind(&message.external_id)
            .bind(message.from_me)
            .bind(&message.sender_id)
            .bind(&message.sender_name)
            .bind(&message.body)
            .bind(&message.message_type)
            .bind(message.sent_at)
            // Own messages never count as unread.
            .bind(message.from_me)
            .bind(message.manager_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn message_exists(&self, session_id: Uuid, external_id: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM messaging_messages WHERE session_id = $1 AND external_id = $2
             )",
        )
        .bind(session_id)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn list_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Message>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM messaging_messages
             WHERE chat_id = $1 AND session_id = $2 AND tenant_id = $3",
        )
        .bind(chat_id)
        .bind(session_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {} FROM messaging_messages
             WHERE chat_id = $1 AND session_id = $2 AND tenant_id = $3
             ORDER BY sent_at DESC, created_at DESC
             LIMIT $4 OFFSET $5",
            MESSAGE_COLUMNS
        );
        let items = sqlx::query_as::<_, Message>(&sql)
            .bind(chat_id)
            .bind(session_id)
            .bind(tenant_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    async fn upsert_grant(&self, grant: NewGrant) -> Result<AccessGrant> {
        let sql = format!(
            "INSERT INTO session_access_grants
                (session_id, manager_id, tenant_id, can_read, can_write, can_manage_chats, granted_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (session_id, manager_id) DO UPDATE SET
                can_read = EXCLUDED.can_read,
                can_write = EXCLUDED.can_write,
                can_manage_chats = EXCLUDED.can_manage_chats,
                granted_by = EXCLUDED.granted_by,
                granted_at = NOW()
             RETURNING {}",
            GRANT_COLUMNS
        );
        sqlx::query_as::<_, AccessGrant>(&sql)
            .bind(grant.session_id)
            .bind(grant.manager_id)
            .bind(grant.tenant_id)
            .bind(grant.can_read)
            .bind(grant.can_write)
            .bind(grant.can_manage_chats)
            .bind(grant.granted_by)
            .fetch_one(&self.pool)
            .await
            .map_err(SwitchboardError::from_db)
    }

    async fn delete_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM session_access_grants
             WHERE session_id = $1 AND manager_id = $2 AND tenant_id = $3",
        )
        .bind(session_id)
        .bind(manager_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_grants(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Vec<AccessGrant>> {
        let sql = format!(
            "SELECT {} FROM session_access_grants
             WHERE session_id = $1 AND tenant_id = $2
             ORDER BY granted_at ASC",
            GRANT_COLUMNS
        );
        Ok(sqlx::query_as::<_, AccessGrant>(&sql)
            .bind(session_id)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<Option<AccessGrant>> {
        let sql = format!(
            "SELECT {} FROM session_access_grants
             WHERE session_id = $1 AND manager_id = $2 AND tenant_id = $3",
            GRANT_COLUMNS
        );
        Ok(sqlx::query_as::<_, AccessGrant>(&sql)
            .bind(session_id)
            .bind(manager_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?)
    }
}
