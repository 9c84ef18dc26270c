//! A store that injects the failures the in-process backend never produces.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::models::{AccessGrant, Chat, Message, Session};
use switchboard_core::store::{
    ChatFilter, ChatUpsert, MemoryStore, NewGrant, NewMessage, Page, PageRequest, ReadResult,
};
use switchboard_core::Store;
use uuid::Uuid;

pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    /// Each pending race lets another row of the tenant claim the phone just
    /// before the next `mark_connected`, which then conflicts.
    identity_races: AtomicUsize,
    fail_read_acks: AtomicBool,
    /// Ids of the rows that won those races.
    pub intruders: tokio::sync::Mutex<Vec<Uuid>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            identity_races: AtomicUsize::new(0),
            fail_read_acks: AtomicBool::new(false),
            intruders: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn race_identity(&self, times: usize) {
        self.identity_races.store(times, Ordering::SeqCst);
    }

    pub fn fail_read_acks(&self, fail: bool) {
        self.fail_read_acks.store(fail, Ordering::SeqCst);
    }

    fn take_race(&self) -> bool {
        self.identity_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_session(&self, tenant_id: Uuid, admin_id: Uuid) -> Result<Session> {
        self.inner.insert_session(tenant_id, admin_id).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.inner.get_session(session_id).await
    }

    async fn get_tenant_session(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Option<Session>> {
        self.inner.get_tenant_session(tenant_id, session_id).await
    }

    async fn active_session_for_tenant(&self, tenant_id: Uuid) -> Result<Option<Session>> {
        self.inner.active_session_for_tenant(tenant_id).await
    }

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<Session>> {
        self.inner.list_sessions(tenant_id).await
    }

    async fn list_active_sessions(&self) -> Result<Vec<Session>> {
        self.inner.list_active_sessions().await
    }

    async fn reset_session(&self, session_id: Uuid, admin_id: Uuid) -> Result<Option<Session>> {
        self.inner.reset_session(session_id, admin_id).await
    }

    async fn set_pairing_code(&self, session_id: Uuid, code: Option<&str>) -> Result<Option<Session>> {
        self.inner.set_pairing_code(session_id, code).await
    }

    async fn mark_connected(
        &self,
        session_id: Uuid,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Session>> {
        if self.take_race() {
            if let Some(target) = self.inner.get_session(session_id).await? {
                let intruder = self
                    .inner
                    .insert_session(target.tenant_id, target.admin_id)
                    .await?;
                self.inner
                    .mark_connected(intruder.id, phone_number, None)
                    .await?;
                self.intruders.lock().await.push(intruder.id);
            }
            return Err(SwitchboardError::Conflict(format!(
                "phone {} already claimed",
                phone_number
            )));
        }
        self.inner
            .mark_connected(session_id, phone_number, display_name)
            .await
    }

    async fn mark_disconnected(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.inner.mark_disconnected(session_id).await
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.inner.deactivate_session(session_id).await
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        self.inner.delete_session(session_id).await
    }

    async fn find_sessions_by_phone(
        &self,
        tenant_id: Uuid,
        phone_number: &str,
        exclude: Uuid,
    ) -> Result<Vec<Session>> {
        self.inner
            .find_sessions_by_phone(tenant_id, phone_number, exclude)
            .await
    }

    async fn purge_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        self.inner.purge_stale_sessions(cutoff).await
    }

    async fn upsert_chat(&self, upsert: ChatUpsert) -> Result<Chat> {
        self.inner.upsert_chat(upsert).await
    }

    async fn get_chat(&self, tenant_id: Uuid, session_id: Uuid, chat_id: Uuid) -> Result<Option<Chat>> {
        self.inner.get_chat(tenant_id, session_id, chat_id).await
    }

    async fn list_chats(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        filter: &ChatFilter,
        page: PageRequest,
    ) -> Result<Page<Chat>> {
        self.inner.list_chats(tenant_id, session_id, filter, page).await
    }

    async fn mark_chat_read(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<ReadResult>> {
        if self.fail_read_acks.load(Ordering::SeqCst) {
            return Err(SwitchboardError::Io(std::io::Error::other("read acknowledgement lost")));
        }
        self.inner.mark_chat_read(tenant_id, session_id, chat_id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>> {
        self.inner.insert_message(message).await
    }

    async fn message_exists(&self, session_id: Uuid, external_id: &str) -> Result<bool> {
        self.inner.message_exists(session_id, external_id).await
    }

    async fn list_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Message>> {
        self.inner.list_messages(tenant_id, session_id, chat_id, page).await
    }

    async fn upsert_grant(&self, grant: NewGrant) -> Result<AccessGrant> {
        self.inner.upsert_grant(grant).await
    }

    async fn delete_grant(&self, tenant_id: Uuid, session_id: Uuid, manager_id: Uuid) -> Result<bool> {
        self.inner.delete_grant(tenant_id, session_id, manager_id).await
    }

    async fn list_grants(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Vec<AccessGrant>> {
        self.inner.list_grants(tenant_id, session_id).await
    }

    async fn find_grant(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        manager_id: Uuid,
    ) -> Result<Option<AccessGrant>> {
        self.inner.find_grant(tenant_id, session_id, manager_id).await
    }
}
