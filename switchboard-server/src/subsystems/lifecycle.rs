//! Session Lifecycle Controller
//!
//! Owns every transition of the session state machine:
//!
//! ```text
//! Pending → AwaitingPairing → Connected ⇄ Disconnected → Destroyed
//! ```
//!
//! Each live session has one worker task that drains its client's event
//! channel in order. Work that must not interleave within a tenant (create,
//! identity commit, destroy) runs under a per-tenant async mutex. The store
//! row is always written before the registry cache and before anything is
//! published.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use switchboard_core::client::{
    self, ClientEvent, ClientFactory, ClientOptions, IncomingMessage, MessagingClient,
};
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::models::{normalize_identity, Session};
use switchboard_core::Store;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ingest::{self, IngestPolicy};
use super::notify::{Notification, Notifier, SessionStatus};
use super::pairing::render_pairing_image;
use super::registry::{LiveSession, SessionRegistry};

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome of re-attaching sessions at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    /// Active rows without pairing artifacts, deactivated instead.
    pub demoted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub purged: usize,
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[derive(Default)]
struct TenantLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(tenant_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct ControllerInner {
    store: Arc<dyn Store>,
    factory: Arc<dyn ClientFactory>,
    registry: SessionRegistry,
    notifier: Notifier,
    policy: IngestPolicy,
    auth_root: PathBuf,
    event_buffer: usize,
    retention: chrono::Duration,
    locks: TenantLocks,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn Store>,
        factory: Arc<dyn ClientFactory>,
        notifier: Notifier,
        config: &SwitchboardConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                factory,
                registry: SessionRegistry::new(),
                notifier,
                policy: IngestPolicy::from(&config.ingest),
                auth_root: config.messaging.auth_root(),
                event_buffer: config.messaging.event_buffer,
                retention: chrono::Duration::hours(config.sessions.retention_hours),
                locks: TenantLocks::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.inner.policy
    }

    pub fn auth_root(&self) -> &Path {
        &self.inner.auth_root
    }

    /// Open a new channel for a tenant.
    ///
    /// Runs a cleanup pass first. An active placeholder that never paired and
    /// is not live here is reset and reused; any other active session is a
    /// `Conflict`. The transport initializes in the background.
    pub async fn create_session(&self, tenant_id: Uuid, admin_id: Uuid) -> Result<Session> {
        let _guard = self.inner.locks.acquire(tenant_id).await;

        if let Err(e) = self.cleanup_pass().await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Cleanup before create failed");
        }

        let store = &self.inner.store;
        let session = match store.active_session_for_tenant(tenant_id).await? {
            Some(existing) if self.is_stale_placeholder(&existing).await => {
                tracing::info!(
                    session_id = %existing.id,
                    tenant_id = %tenant_id,
                    "Reusing stale placeholder session"
                );
                self.discard_artifacts(existing.id);
                store
                    .reset_session(existing.id, admin_id)
                    .await?
                    .ok_or_else(|| SwitchboardError::NotFound(format!("session {}", existing.id)))?
            }
            Some(existing) => {
                return Err(SwitchboardError::Conflict(format!(
                    "tenant {} already has active session {}",
                    tenant_id, existing.id
                )));
            }
            None => store.insert_session(tenant_id, admin_id).await?,
        };

        self.start_client(&session, false).await?;
        self.inner.notifier.publish_session_status(&session).await;
        tracing::info!(session_id = %session.id, tenant_id = %tenant_id, "Session created");
        Ok(session)
    }

    async fn is_stale_placeholder(&self, session: &Session) -> bool {
        session.is_placeholder() && !self.inner.registry.contains(session.id).await
    }

    /// Instantiate a client for an existing row, register it and start its worker.
    /// The transport initializes in the background.
    ///
    /// With `resume` the client reuses the pairing artifacts on disk instead of
    /// starting a fresh pairing.
    pub async fn start_client(&self, session: &Session, resume: bool) -> Result<()> {
        let client = self.attach_client(session, resume).await?;
        let controller = self.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            if let Err(e) = client.initialize().await {
                controller.on_init_failure(session_id, e).await;
            }
        });
        Ok(())
    }

    async fn attach_client(&self, session: &Session, resume: bool) -> Result<Arc<dyn MessagingClient>> {
        let handle = self
            .inner
            .factory
            .create(ClientOptions {
                session_id: session.id,
                auth_dir: client::artifact_dir(&self.inner.auth_root, session.id),
                resume,
                event_buffer: self.inner.event_buffer,
            })
            .await?;

        let cancel = CancellationToken::new();
        let entry = LiveSession::new(session.tenant_id, handle.client.clone(), cancel.clone());
        if let Err(e) = self.inner.registry.register(session.id, entry).await {
            if let Err(teardown) = handle.client.destroy().await {
                tracing::warn!(session_id = %session.id, error = %teardown, "Client teardown failed");
            }
            return Err(e);
        }

        tokio::spawn(run_session_worker(
            self.clone(),
            session.id,
            handle.events,
            cancel,
        ));
        Ok(handle.client)
    }

    /// Nothing runs for the session any more, so the row must not claim a connection.
    async fn on_init_failure(&self, session_id: Uuid, error: SwitchboardError) {
        tracing::error!(session_id = %session_id, error = %error, "Client initialization failed");
        if let Some(live) = self.inner.registry.detach(session_id).await {
            live.shut_down(session_id).await;
        }
        let session = match self.inner.store.mark_disconnected(session_id).await {
            Ok(Some(session)) => Ok(Some(session)),
            Ok(None) => self.inner.store.get_session(session_id).await,
            Err(e) => Err(e),
        };
        match session {
            Ok(Some(session)) => {
                let status =
                    SessionStatus::of(&session).with_reason(format!("initialization failed: {}", error));
                self.inner
                    .notifier
                    .publish(&Notification::SessionStatus {
                        session_id,
                        tenant_id: session.tenant_id,
                        status,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Could not load session after init failure");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------------

    /// Apply one client event. Events for sessions no longer live here are ignored.
    pub async fn handle_event(&self, session_id: Uuid, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::PairingCode(code) => self.on_pairing_code(session_id, &code).await,
            ClientEvent::Authenticated {
                identity,
                display_name,
            } => {
                self.on_authenticated(session_id, identity, display_name)
                    .await
            }
            ClientEvent::MessageReceived(message) => self.on_message(session_id, message).await,
            ClientEvent::Disconnected { reason } => self.on_disconnected(session_id, &reason).await,
        }
    }

    async fn on_pairing_code(&self, session_id: Uuid, code: &str) -> Result<()> {
        if !self.inner.registry.contains(session_id).await {
            tracing::debug!(session_id = %session_id, "Pairing code for a session no longer live");
            return Ok(());
        }
        let image = render_pairing_image(code)?;
        let Some(session) = self
            .inner
            .store
            .set_pairing_code(session_id, Some(&image))
            .await?
        else {
            return Ok(());
        };
        self.inner.registry.set_disconnected(session_id).await;
        self.inner.notifier.publish_session_status(&session).await;
        tracing::info!(session_id = %session_id, "Pairing code ready");
        Ok(())
    }

    async fn on_authenticated(
        &self,
        session_id: Uuid,
        reported: String,
        display_name: Option<String>,
    ) -> Result<()> {
        let Some(client) = self.inner.registry.client(session_id).await else {
            tracing::debug!(session_id = %session_id, "Authentication for a session no longer live");
            return Ok(());
        };
        let raw = client.current_identity().await.unwrap_or(reported);
        let identity = normalize_identity(&raw)
            .ok_or_else(|| SwitchboardError::Invalid(format!("malformed identity '{}'", raw)))?;

        let Some(session) = self.inner.store.get_session(session_id).await? else {
            return Ok(());
        };
        let _guard = self.inner.locks.acquire(session.tenant_id).await;
        if !self.inner.registry.contains(session_id).await {
            tracing::debug!(session_id = %session_id, "Session destroyed while awaiting commit");
            return Ok(());
        }

        match self
            .commit_identity(&session, &identity, display_name.as_deref())
            .await
        {
            Ok(Some(committed)) => {
                self.inner
                    .registry
                    .set_connected(session_id, Some(identity.clone()))
                    .await;
                self.inner.notifier.publish_session_status(&committed).await;
                tracing::info!(session_id = %session_id, identity = %identity, "Session authenticated");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                let status = SessionStatus::of(&session)
                    .with_reason(format!("could not claim identity {}: {}", identity, e));
                self.inner
                    .notifier
                    .publish(&Notification::SessionStatus {
                        session_id,
                        tenant_id: session.tenant_id,
                        status,
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Purge other holders of `identity`, then commit it. A uniqueness conflict
    /// means a holder appeared in between: purge again and retry once.
    async fn commit_identity(
        &self,
        session: &Session,
        identity: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Session>> {
        let store = &self.inner.store;
        self.purge_identity_holders(session, identity).await?;
        match store.mark_connected(session.id, identity, display_name).await {
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    session_id = %session.id,
                    identity = %identity,
                    "Identity claimed concurrently, retrying once"
                );
                self.purge_identity_holders(session, identity).await?;
                store.mark_connected(session.id, identity, display_name).await
            }
            other => other,
        }
    }

    async fn purge_identity_holders(&self, session: &Session, identity: &str) -> Result<usize> {
        let holders = self
            .inner
            .store
            .find_sessions_by_phone(session.tenant_id, identity, session.id)
            .await?;
        let reason = format!("identity {} moved to session {}", identity, session.id);
        for holder in &holders {
            self.purge_session(holder, &reason).await?;
        }
        Ok(holders.len())
    }

    /// Remove every trace of a session: live client, registry entry, row, artifacts.
    async fn purge_session(&self, session: &Session, reason: &str) -> Result<()> {
        if let Some(live) = self.inner.registry.retire(session.id, session.tenant_id).await {
            live.shut_down(session.id).await;
        }
        self.inner.store.delete_session(session.id).await?;
        self.discard_artifacts(session.id);
        self.inner
            .notifier
            .publish(&Notification::SessionStatus {
                session_id: session.id,
                tenant_id: session.tenant_id,
                status: SessionStatus::destroyed(reason),
            })
            .await;
        tracing::warn!(session_id = %session.id, reason = %reason, "Purged conflicting session");
        Ok(())
    }

    async fn on_message(&self, session_id: Uuid, message: IncomingMessage) -> Result<()> {
        if !self.inner.registry.contains(session_id).await {
            return Ok(());
        }
        let Some(session) = self
            .inner
            .store
            .get_session(session_id)
            .await?
            .filter(|s| s.is_active)
        else {
            return Ok(());
        };
        if let Some(applied) =
            ingest::ingest_incoming(self.inner.store.as_ref(), &self.inner.policy, &session, message)
                .await?
        {
            applied.publish(&self.inner.notifier).await;
        }
        Ok(())
    }

    async fn on_disconnected(&self, session_id: Uuid, reason: &str) -> Result<()> {
        if !self.inner.registry.contains(session_id).await {
            return Ok(());
        }
        let Some(session) = self.inner.store.mark_disconnected(session_id).await? else {
            return Ok(());
        };
        self.inner.registry.set_disconnected(session_id).await;
        self.inner
            .notifier
            .publish(&Notification::SessionStatus {
                session_id,
                tenant_id: session.tenant_id,
                status: SessionStatus::of(&session).with_reason(reason),
            })
            .await;
        tracing::info!(session_id = %session_id, reason = %reason, "Session disconnected");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stop the client, retire the registry entry, deactivate the row and
    /// delete pairing artifacts. Destroying twice is a no-op, also after the
    /// cleanup pass purged the row, as long as the tombstone is kept.
    pub async fn destroy_session(&self, session_id: Uuid) -> Result<()> {
        let Some(session) = self.inner.store.get_session(session_id).await? else {
            if self.inner.registry.is_retired(session_id).await {
                tracing::debug!(session_id = %session_id, "Session already destroyed and purged");
                return Ok(());
            }
            return Err(SwitchboardError::NotFound(format!("session {}", session_id)));
        };
        let _guard = self.inner.locks.acquire(session.tenant_id).await;

        let live = self.inner.registry.retire(session_id, session.tenant_id).await;
        let was_live = live.is_some();
        if let Some(live) = live {
            live.shut_down(session_id).await;
        }
        if !session.is_active && !was_live {
            tracing::debug!(session_id = %session_id, "Session already destroyed");
            return Ok(());
        }

        let deactivated = self.inner.store.deactivate_session(session_id).await?;
        self.discard_artifacts(session_id);
        if let Some(session) = deactivated {
            self.inner
                .notifier
                .publish(&Notification::SessionStatus {
                    session_id,
                    tenant_id: session.tenant_id,
                    status: SessionStatus::of(&session).with_reason("destroyed"),
                })
                .await;
        }
        tracing::info!(session_id = %session_id, "Session destroyed");
        Ok(())
    }

    /// Re-attach every active session after a restart.
    ///
    /// Sessions with pairing artifacts get a client in resume mode and count as
    /// resumed once it initialized. Until the client authenticates again the
    /// row reads disconnected. Sessions without artifacts cannot reconnect and
    /// are deactivated.
    pub async fn resume_all_active_sessions(&self) -> Result<ResumeReport> {
        let sessions = self.inner.store.list_active_sessions().await?;
        let mut report = ResumeReport::default();

        for session in sessions {
            if self.inner.registry.contains(session.id).await {
                continue;
            }
            if client::has_artifacts(&self.inner.auth_root, session.id) {
                let session_id = session.id;
                match self.resume_session(session).await {
                    Ok(()) => report.resumed += 1,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Resume failed");
                        report.failed += 1;
                    }
                }
            } else {
                match self.inner.store.deactivate_session(session.id).await {
                    Ok(_) => {
                        tracing::info!(session_id = %session.id, "No pairing artifacts, session deactivated");
                        report.demoted += 1;
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "Demotion failed");
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            resumed = report.resumed,
            demoted = report.demoted,
            failed = report.failed,
            "Session resume complete"
        );
        Ok(report)
    }

    async fn resume_session(&self, session: Session) -> Result<()> {
        let session = if session.is_connected {
            self.inner
                .store
                .mark_disconnected(session.id)
                .await?
                .unwrap_or(session)
        } else {
            session
        };
        let client = self.attach_client(&session, true).await?;
        if let Err(e) = client.initialize().await {
            let message = e.to_string();
            self.on_init_failure(session.id, e).await;
            return Err(SwitchboardError::Client(message));
        }
        Ok(())
    }

    /// Purge inactive placeholders and inactive rows past the retention window,
    /// then forget tombstones older than the same window.
    pub async fn cleanup_pass(&self) -> Result<CleanupReport> {
        let cutoff = Utc::now() - self.inner.retention;
        let purged = self.inner.store.purge_stale_sessions(cutoff).await?;
        for session in &purged {
            if let Some(live) = self.inner.registry.retire(session.id, session.tenant_id).await {
                live.shut_down(session.id).await;
            }
            self.discard_artifacts(session.id);
        }
        if !purged.is_empty() {
            tracing::info!(purged = purged.len(), "Purged stale sessions");
        }
        let pruned = self.inner.registry.prune_retired(cutoff).await;
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped expired tombstones");
        }
        Ok(CleanupReport {
            purged: purged.len(),
        })
    }

    /// Release every live client without touching the rows, so the next
    /// start can resume them.
    pub async fn shutdown(&self) {
        let live = self.inner.registry.drain().await;
        let count = live.len();
        for (session_id, session) in live {
            session.shut_down(session_id).await;
        }
        tracing::info!(released = count, "Session controller shut down");
    }

    fn discard_artifacts(&self, session_id: Uuid) {
        if let Err(e) = client::remove_artifacts(&self.inner.auth_root, session_id) {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to remove pairing artifacts");
        }
    }
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

async fn run_session_worker(
    controller: SessionController,
    session_id: Uuid,
    mut events: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
) {
    tracing::debug!(session_id = %session_id, "Session worker started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = controller.handle_event(session_id, event).await {
                        tracing::error!(session_id = %session_id, error = %e, "Failed to apply client event");
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!(session_id = %session_id, "Session worker stopped");
}

pub async fn run_cleanup_loop(
    controller: SessionController,
    interval_minutes: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Session cleanup loop started (interval: {}min)", interval_minutes);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match controller.cleanup_pass().await {
                    Ok(report) => tracing::debug!(purged = report.purged, "Cleanup pass complete"),
                    Err(e) => tracing::error!("Cleanup error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session cleanup loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::client::SimulatedClientFactory;
    use switchboard_core::store::MemoryStore;

    struct Harness {
        controller: SessionController,
        store: Arc<MemoryStore>,
        factory: Arc<SimulatedClientFactory>,
        _auth: tempfile::TempDir,
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn harness_with(tweak: impl FnOnce(&mut SwitchboardConfig)) -> Harness {
        let auth = tempfile::tempdir().unwrap();
        let mut config = SwitchboardConfig::ephemeral(auth.path().to_string_lossy());
        tweak(&mut config);
        let store = Arc::new(MemoryStore::new());
        let factory = Arc::new(SimulatedClientFactory::new());
        let controller = SessionController::new(
            store.clone(),
            factory.clone(),
            Notifier::new(16),
            &config,
        );
        Harness {
            controller,
            store,
            factory,
            _auth: auth,
        }
    }

    #[tokio::test]
    async fn test_second_create_conflicts_while_first_is_live() {
        let h = harness();
        let tenant = Uuid::new_v4();
        let first = h.controller.create_session(tenant, Uuid::new_v4()).await.unwrap();
        assert_eq!(first.state(), switchboard_core::models::SessionState::Pending);
        assert!(h.controller.registry().contains(first.id).await);

        let err = h
            .controller
            .create_session(tenant, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_stale_placeholder_is_reused() {
        let h = harness();
        let tenant = Uuid::new_v4();
        let orphan = h.store.insert_session(tenant, Uuid::new_v4()).await.unwrap();

        let admin = Uuid::new_v4();
        let session = h.controller.create_session(tenant, admin).await.unwrap();
        assert_eq!(session.id, orphan.id);
        assert_eq!(session.admin_id, admin);
        assert_eq!(h.store.list_sessions(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_apply_in_order() {
        let h = harness();
        let tenant = Uuid::new_v4();
        let session = h.controller.create_session(tenant, Uuid::new_v4()).await.unwrap();

        h.controller
            .handle_event(session.id, ClientEvent::PairingCode("pair-me".to_string()))
            .await
            .unwrap();
        let row = h.store.get_session(session.id).await.unwrap().unwrap();
        assert!(row
            .pairing_code
            .as_deref()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));

        h.controller
            .handle_event(
                session.id,
                ClientEvent::Authenticated {
                    identity: "+1000@s.example".to_string(),
                    display_name: Some("Shop".to_string()),
                },
            )
            .await
            .unwrap();
        let row = h.store.get_session(session.id).await.unwrap().unwrap();
        assert!(row.is_connected);
        assert!(row.pairing_code.is_none());
        assert_eq!(row.phone_number.as_deref(), Some("+1000"));
        assert!(h.controller.registry().state(session.id).await.unwrap().connected);

        h.controller
            .handle_event(
                session.id,
                ClientEvent::Disconnected {
                    reason: "network".to_string(),
                },
            )
            .await
            .unwrap();
        let row = h.store.get_session(session.id).await.unwrap().unwrap();
        assert!(!row.is_connected);
        assert!(row.is_active);
        assert!(h.controller.registry().contains(session.id).await);
    }

    #[tokio::test]
    async fn test_malformed_identity_is_rejected() {
        let h = harness();
        let session = h
            .controller
            .create_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let err = h
            .controller
            .handle_event(
                session.id,
                ClientEvent::Authenticated {
                    identity: "nobody".to_string(),
                    display_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Invalid(_)));
        assert!(!h.store.get_session(session.id).await.unwrap().unwrap().is_connected);
    }

    #[tokio::test]
    async fn test_events_after_destroy_are_ignored() {
        let h = harness();
        let session = h
            .controller
            .create_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        h.controller.destroy_session(session.id).await.unwrap();

        h.controller
            .handle_event(
                session.id,
                ClientEvent::Authenticated {
                    identity: "+1000".to_string(),
                    display_name: None,
                },
            )
            .await
            .unwrap();
        let row = h.store.get_session(session.id).await.unwrap().unwrap();
        assert!(!row.is_active);
        assert!(row.phone_number.is_none());

        let device = h.factory.device(session.id).await.unwrap();
        assert!(device.is_destroyed().await);
    }

    #[tokio::test]
    async fn test_cleanup_purges_inactive_placeholders() {
        let h = harness();
        let tenant = Uuid::new_v4();
        let session = h.controller.create_session(tenant, Uuid::new_v4()).await.unwrap();
        h.controller.destroy_session(session.id).await.unwrap();

        let report = h.controller.cleanup_pass().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(h.store.get_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_forgets_expired_tombstones() {
        let h = harness_with(|c| c.sessions.retention_hours = 0);
        let session = h
            .controller
            .create_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        h.controller.destroy_session(session.id).await.unwrap();
        assert!(h.controller.registry().is_retired(session.id).await);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = h.controller.cleanup_pass().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(!h.controller.registry().is_retired(session.id).await);

        let err = h.controller.destroy_session(session.id).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_keeps_rows_active() {
        let h = harness();
        let session = h
            .controller
            .create_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        h.controller.shutdown().await;

        assert!(h.controller.registry().is_empty().await);
        assert!(h.store.get_session(session.id).await.unwrap().unwrap().is_active);
    }
}
