use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ChatFilter, ChatUpsert, NewGrant, NewMessage, Page, PageRequest, ReadResult, Store};
use crate::error::{Result, SwitchboardError};
use crate::models::{AccessGrant, Chat, Message, Session};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    chats: HashMap<Uuid, Chat>,
    messages: HashMap<Uuid, Message>,
    grants: HashMap<(Uuid, Uuid), AccessGrant>,
}

impl Tables {
    fn phone_taken(&self, tenant_id: Uuid, phone: &str, except: Uuid) -> bool {
        self.sessions.values().any(|s| {
            s.id != except && s.tenant_id == tenant_id && s.phone_number.as_deref() == Some(phone)
        })
    }

    fn active_for_tenant(&self, tenant_id: Uuid) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.is_active)
    }

    fn active_session_mut(&mut self, session_id: Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id).filter(|s| s.is_active)
    }

    fn remove_session(&mut self, session_id: Uuid) -> Option<Session> {
        let removed = self.sessions.remove(&session_id)?;
        self.chats.retain(|_, c| c.session_id != session_id);
        self.messages.retain(|_, m| m.session_id != session_id);
        self.grants.retain(|(sid, _), _| *sid != session_id);
        Some(removed)
    }
}

/// In-process store enforcing the same uniqueness rules as the PostgreSQL schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind a session's `updated_at`, letting retention tests age rows.
    pub async fn backdate_session(&self, session_id: Uuid, updated_at: DateTime<Utc>) {
        let mut t = self.tables.lock().await;
        if let Some(s) = t.sessions.get_mut(&session_id) {
            s.updated_at = updated_at;
        }
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit() as usize).min(items.len());
    Page::new(items[start..end].to_vec(), total, page)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, tenant_id: Uuid, admin_id: Uuid) -> Result<Session> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            tenant_id,
            admin_id,
            phone_number: None,
            display_name: None,
            is_active: true,
            is_connected: false,
            pairing_code: None,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        };
        t.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(&session_id).cloned())
    }

    async fn get_tenant_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn active_session_for_tenant(&self, tenant_id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.active_for_tenant(tenant_id).cloned())
    }

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        let mut sessions: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        let mut sessions: Vec<Session> =
            t.sessions.values().filter(|s| s.is_active).cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn reset_session(&self, session_id: Uuid, admin_id: Uuid) -> Result<Option<Session>> {
        let mut t = self.tables.lock().await;
        Ok(t.active_session_mut(session_id).map(|s| {
            s.admin_id = admin_id;
            s.pairing_code = None;
            s.is_connected = false;
            s.updated_at = Utc::now();
            s.clone()
        }))
    }

    async fn set_pairing_code(
        &self,
        session_id: Uuid,
        code: Option<&str>,
    ) -> Result<Option<Session>> {
        let mut t = self.tables.lock().await;
        Ok(t.active_session_mut(session_id).map(|s| {
            s.pairing_code = code.map(str::to_string);
            s.updated_at = Utc::now();
            s.clone()
        }))
    }

    async fn mark_connected(
        &self,
        session_id: Uuid,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Session>> {
        let mut t = self.tables.lock().await;
        let Some(tenant_id) = t
            .sessions
            .get(&session_id)
            .filter(|s| s.is_active)
            .map(|s| s.tenant_id)
        else {
            return Ok(None);
        };
        if t.phone_taken(tenant_id, phone_number, session_id) {
            return Err(SwitchboardError::Conflict(
                "violates messaging_sessions_tenant_phone_key".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(t.active_session_mut(session_id).map(|s| {
            s.phone_number = Some(phone_number.to_string());
            if let Some(name) = display_name {
                s.display_name = Some(name.to_string());
            }
            s.is_connected = true;
            s.pairing_code = None;
            s.last_seen_at = Some(now);
            s.updated_at = now;
            s.clone()
        }))
    }

    async fn mark_disconnected(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        Ok(t.active_session_mut(session_id).map(|s| {
            s.is_connected = false;
            s.last_seen_at = Some(now);
            s.updated_at = now;
            s.clone()
        }))
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut t = self.tables.lock().await;
        Ok(t.sessions.get_mut(&session_id).map(|s| {
            s.is_active = false;
            s.is_connected = false;
            s.pairing_code = None;
            s.updated_at = Utc::now();
            s.clone()
        }))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.remove_session(session_id).is_some())
    }

    async fn find_sessions_by_phone(
        &self,
        tenant_id: Uuid,
        phone_number: &str,
        exclude: Uuid,
    ) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions
            .values()
            .filter(|s| {
                s.id != exclude
                    && s.tenant_id == tenant_id
                    && s.phone_number.as_deref() == Some(phone_number)
            })
            .cloned()
            .collect())
    }

    async fn purge_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut t = self.tables.lock().await;
        let stale: Vec<Uuid> = t
            .sessions
            .values()
            .filter(|s| !s.is_active && (s.phone_number.is_none() || s.updated_at < cutoff))
            .map(|s| s.id)
            .collect();
        Ok(stale
            .into_iter()
            .filter_map(|id| t.remove_session(id))
            .collect())
    }

    async fn upsert_chat(&self, upsert: ChatUpsert) -> Result<Chat> {
        let mut t = self.tables.lock().await;
        if !t.sessions.contains_key(&upsert.session_id) {
            return Err(SwitchboardError::NotFound(format!(
                "session {} (chat foreign key)",
                upsert.session_id
            )));
        }
        let existing = t
            .chats
            .values_mut()
            .find(|c| c.session_id == upsert.session_id && c.external_id == upsert.external_id);

        if let Some(chat) = existing {
            chat.last_message_at = Some(upsert.last_message_at);
            chat.last_message_text = Some(upsert.last_message_text);
            chat.unread_count += upsert.unread_increment;
            return Ok(chat.clone());
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            session_id: upsert.session_id,
            tenant_id: upsert.tenant_id,
            external_id: upsert.external_id,
            name: upsert.name,
            kind: upsert.kind,
            last_message_at: Some(upsert.last_message_at),
            last_message_text: Some(upsert.last_message_text),
            unread_count: upsert.unread_increment,
            created_at: Utc::now(),
        };
        t.chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn get_chat(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<Chat>> {
        let t = self.tables.lock().await;
        Ok(t.chats
            .get(&chat_id)
            .filter(|c| c.session_id == session_id && c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_chats(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        filter: &ChatFilter,
        page: PageRequest,
    ) -> Result<Page<Chat>> {
        let t = self.tables.lock().await;
        let mut chats: Vec<Chat> = t
            .chats
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.session_id == session_id)
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        // Newest activity first, chats without traffic last.
        chats.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(paginate(&chats, page))
    }

    async fn mark_chat_read(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<ReadResult>> {
        let mut t = self.tables.lock().await;
        let Some(previous_unread) = t
            .chats
            .get(&chat_id)
            .filter(|c| c.session_id == session_id && c.tenant_id == tenant_id)
            .map(|c| c.unread_count)
        else {
            return Ok(None);
        };

        let mut marked = 0u64;
        for m in t.messages.values_mut() {
            if m.chat_id == chat_id && !m.from_me && !m.is_read {
                m.is_read = true;
                marked += 1;
            }
        }

        let Some(chat) = t.chats.get_mut(&chat_id) else {
            return Ok(None);
        };
        chat.unread_count = 0;

        Ok(Some(ReadResult {
            marked,
            previous_unread,
            chat: chat.clone(),
        }))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>> {
        let mut t = self.tables.lock().await;
        if !t.chats.contains_key(&message.chat_id) {
            return Err(SwitchboardError::NotFound(format!(
                "chat {} (message foreign key)",
                message.chat_id
            )));
        }
        let duplicate = t
            .messages
            .values()
            .any(|m| m.session_id == message.session_id && m.external_id == message.external_id);
        if duplicate {
            return Ok(None);
        }
        let stored = Message {
            id: Uuid::new_v4(),
            chat_id: message.chat_id,
            session_id: message.session_id,
            tenant_id: message.tenant_id,
            external_id: message.external_id,
            from_me: message.from_me,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            message_type: message.message_type,
            sent_at: message.sent_at,
            is_read: message.from_me,
            manager_id: message.manager_id,
            created_at: Utc::now(),
        };
        t.messages.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn message_exists(&self, session_id: Uuid, external_id: &str) -> Result<bool> {
        let t = self.tables.lock().await;
        Ok(t
            .messages
            .values()
            .any(|m| m.session_id == session_id && m.external_id == external_id))
    }

    async fn list_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Message>> {
        let t = self.tables.lock().await;
        let mut messages: Vec<Message> = t
            .messages
            .values()
            .filter(|m| {
                m.chat_id == chat_id && m.session_id == session_id && m.tenant_id == tenant_id
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| {
            b.sent_at
                .cmp(&a.sent_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(paginate(&messages, page))
    }

    async fn upsert_grant(&self, grant: NewGrant) -> Result<AccessGrant> {
        let mut t = self.tables.lock().await;
        if !t.sessions.contains_key(&grant.session_id) {
            return Err(SwitchboardError::NotFound(format!(
                "session {} (grant foreign key)",
                grant.session_id
            )));
        }
        let stored = AccessGrant {
            session_id: grant.session_id,
            manager_id: grant.manager_id,
            tenant_id: grant.tenant_id,
            can_read: grant.can_read,
            can_write: grant.can_write,
            can_manage_chats: grant.can_manage_chats,
            granted_by: grant.granted_by,
            granted_at: Utc::now(),
        };
        t.grants
            .insert((grant.session_id, grant.manager_id), stored.clone());
        Ok(stored)
    }

    async fn delete_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let matches = t
            .grants
            .get(&(session_id, manager_id))
            .is_some_and(|g| g.tenant_id == tenant_id);
        if matches {
            t.grants.remove(&(session_id, manager_id));
        }
        Ok(matches)
    }

    async fn list_grants(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Vec<AccessGrant>> {
        let t = self.tables.lock().await;
        let mut grants: Vec<AccessGrant> = t
            .grants
            .values()
            .filter(|g| g.session_id == session_id && g.tenant_id == tenant_id)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.granted_at.cmp(&b.granted_at));
        Ok(grants)
    }

    async fn find_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<Option<AccessGrant>> {
        let t = self.tables.lock().await;
        Ok(t.grants
            .get(&(session_id, manager_id))
            .filter(|g| g.tenant_id == tenant_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatKind;

    fn upsert(session: &Session, external_id: &str, text: &str, increment: i32) -> ChatUpsert {
        ChatUpsert {
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: external_id.to_string(),
            name: "Alice".to_string(),
            kind: ChatKind::Individual,
            last_message_at: Utc::now(),
            last_message_text: text.to_string(),
            unread_increment: increment,
        }
    }

    #[tokio::test]
    async fn test_active_lookup_ignores_deactivated_rows() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let first = store.insert_session(tenant, Uuid::new_v4()).await.unwrap();
        assert_eq!(
            store.active_session_for_tenant(tenant).await.unwrap().map(|s| s.id),
            Some(first.id)
        );

        store.deactivate_session(first.id).await.unwrap();
        assert!(store.active_session_for_tenant(tenant).await.unwrap().is_none());

        // Deactivation is repeatable and keeps the history row.
        let again = store.deactivate_session(first.id).await.unwrap().unwrap();
        assert!(!again.is_active);
        assert_eq!(store.list_sessions(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_phone_unique_per_tenant_only() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let a = store.insert_session(tenant, Uuid::new_v4()).await.unwrap();
        store.mark_connected(a.id, "+1000", None).await.unwrap();
        store.deactivate_session(a.id).await.unwrap();

        // The inactive row still holds the phone.
        let b = store.insert_session(tenant, Uuid::new_v4()).await.unwrap();
        let err = store.mark_connected(b.id, "+1000", None).await.unwrap_err();
        assert!(err.is_conflict());

        // Another tenant may pair the same phone.
        let other = store.insert_session(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        let connected = store
            .mark_connected(other.id, "+1000", Some("Other"))
            .await
            .unwrap()
            .unwrap();
        assert!(connected.is_connected);
        assert_eq!(connected.display_name.as_deref(), Some("Other"));
    }

    #[tokio::test]
    async fn test_upsert_chat_accumulates_unread() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let first = store.upsert_chat(upsert(&session, "C1", "hi", 1)).await.unwrap();
        let second = store.upsert_chat(upsert(&session, "C1", "again", 1)).await.unwrap();
        let own = store.upsert_chat(upsert(&session, "C1", "reply", 0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.unread_count, 2);
        assert_eq!(own.unread_count, 2);
        assert_eq!(own.last_message_text.as_deref(), Some("reply"));
    }

    #[tokio::test]
    async fn test_purge_keeps_active_and_recent_paired_rows() {
        let store = MemoryStore::new();
        let cutoff = Utc::now() - chrono::Duration::hours(24);

        // Inactive placeholder: purged regardless of age.
        let placeholder = store.insert_session(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        store.deactivate_session(placeholder.id).await.unwrap();

        // Inactive paired, recent: kept.
        let recent = store.insert_session(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        store.mark_connected(recent.id, "+1", None).await.unwrap();
        store.deactivate_session(recent.id).await.unwrap();

        // Inactive paired, old: purged.
        let old = store.insert_session(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        store.mark_connected(old.id, "+2", None).await.unwrap();
        store.deactivate_session(old.id).await.unwrap();
        store
            .backdate_session(old.id, Utc::now() - chrono::Duration::hours(48))
            .await;

        // Active placeholder: kept.
        let active = store.insert_session(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();

        let purged: Vec<Uuid> = store
            .purge_stale_sessions(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(purged.len(), 2);
        assert!(purged.contains(&placeholder.id));
        assert!(purged.contains(&old.id));
        assert!(store.get_session(recent.id).await.unwrap().is_some());
        assert!(store.get_session(active.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_message_external_id_is_ignored() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let chat = store.upsert_chat(upsert(&session, "C1", "hi", 1)).await.unwrap();

        let msg = NewMessage {
            chat_id: chat.id,
            session_id: session.id,
            tenant_id: session.tenant_id,
            external_id: "M1".to_string(),
            from_me: false,
            sender_id: "C1".to_string(),
            sender_name: Some("Alice".to_string()),
            body: "hi".to_string(),
            message_type: "text".to_string(),
            sent_at: Utc::now(),
            manager_id: None,
        };

        assert!(store.insert_message(msg.clone()).await.unwrap().is_some());
        assert!(store.insert_message(msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookups_are_tenant_scoped() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let chat = store.upsert_chat(upsert(&session, "C1", "hi", 1)).await.unwrap();
        let stranger = Uuid::new_v4();

        assert!(store
            .get_tenant_session(stranger, session.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_chat(stranger, session.id, chat.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .mark_chat_read(stranger, session.id, chat.id)
            .await
            .unwrap()
            .is_none());
    }
}
