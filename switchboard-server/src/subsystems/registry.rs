//! Session Registry: which sessions are live in this process.
//!
//! Maps a session id to its client handle plus the cached connection state.
//! Entries removed by a destroy or a conflict purge are tombstoned so a late
//! event or a racing create can never bring the same session back. Tombstones
//! are kept until the cleanup pass prunes them after the retention window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_core::client::MessagingClient;
use switchboard_core::error::{Result, SwitchboardError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A live connection owned by this process.
pub struct LiveSession {
    pub tenant_id: Uuid,
    pub client: Arc<dyn MessagingClient>,
    /// Stops the session's event worker.
    pub cancel: CancellationToken,
    pub connected: bool,
    pub identity: Option<String>,
}

impl LiveSession {
    pub fn new(tenant_id: Uuid, client: Arc<dyn MessagingClient>, cancel: CancellationToken) -> Self {
        Self {
            tenant_id,
            client,
            cancel,
            connected: false,
            identity: None,
        }
    }

    /// Stop the worker and tear down the transport. Failures are logged.
    pub async fn shut_down(self, session_id: Uuid) {
        self.cancel.cancel();
        if let Err(e) = self.client.destroy().await {
            tracing::warn!(session_id = %session_id, error = %e, "Client teardown failed");
        }
    }
}

/// Cached view of a live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveState {
    pub tenant_id: Uuid,
    pub connected: bool,
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    tenant_id: Uuid,
    retired_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    live: HashMap<Uuid, LiveSession>,
    retired: HashMap<Uuid, Tombstone>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live entry. `Conflict` if the id is already live or was retired.
    pub async fn register(&self, session_id: Uuid, entry: LiveSession) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.retired.contains_key(&session_id) {
            return Err(SwitchboardError::Conflict(format!(
                "session {} was destroyed",
                session_id
            )));
        }
        if inner.live.contains_key(&session_id) {
            return Err(SwitchboardError::Conflict(format!(
                "session {} is already live",
                session_id
            )));
        }
        inner.live.insert(session_id, entry);
        Ok(())
    }

    pub async fn contains(&self, session_id: Uuid) -> bool {
        self.inner.read().await.live.contains_key(&session_id)
    }

    pub async fn is_retired(&self, session_id: Uuid) -> bool {
        self.inner.read().await.retired.contains_key(&session_id)
    }

    /// Tenant of a retired session, while its tombstone is kept.
    pub async fn retired_tenant(&self, session_id: Uuid) -> Option<Uuid> {
        self.inner
            .read()
            .await
            .retired
            .get(&session_id)
            .map(|t| t.tenant_id)
    }

    pub async fn client(&self, session_id: Uuid) -> Option<Arc<dyn MessagingClient>> {
        self.inner
            .read()
            .await
            .live
            .get(&session_id)
            .map(|l| l.client.clone())
    }

    pub async fn state(&self, session_id: Uuid) -> Option<LiveState> {
        self.inner.read().await.live.get(&session_id).map(|l| LiveState {
            tenant_id: l.tenant_id,
            connected: l.connected,
            identity: l.identity.clone(),
        })
    }

    pub async fn set_connected(&self, session_id: Uuid, identity: Option<String>) -> bool {
        let mut inner = self.inner.write().await;
        match inner.live.get_mut(&session_id) {
            Some(live) => {
                live.connected = true;
                if identity.is_some() {
                    live.identity = identity;
                }
                true
            }
            None => false,
        }
    }

    pub async fn set_disconnected(&self, session_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        match inner.live.get_mut(&session_id) {
            Some(live) => {
                live.connected = false;
                true
            }
            None => false,
        }
    }

    /// Drop an entry without tombstoning it, so the session can be started again.
    pub async fn detach(&self, session_id: Uuid) -> Option<LiveSession> {
        self.inner.write().await.live.remove(&session_id)
    }

    /// Remove an entry for good. Retiring again keeps the first tombstone.
    pub async fn retire(&self, session_id: Uuid, tenant_id: Uuid) -> Option<LiveSession> {
        let mut inner = self.inner.write().await;
        inner.retired.entry(session_id).or_insert(Tombstone {
            tenant_id,
            retired_at: Utc::now(),
        });
        inner.live.remove(&session_id)
    }

    /// Forget tombstones older than `cutoff`. Returns how many were dropped.
    pub async fn prune_retired(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.retired.len();
        inner.retired.retain(|_, t| t.retired_at >= cutoff);
        before - inner.retired.len()
    }

    /// Take every live entry, leaving the registry empty.
    pub async fn drain(&self) -> Vec<(Uuid, LiveSession)> {
        self.inner.write().await.live.drain().collect()
    }

    pub async fn live_ids(&self) -> Vec<Uuid> {
        self.inner.read().await.live.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.live.is_empty()
    }
}
