#![allow(dead_code)]

pub mod faulty_store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use switchboard_core::client::{ChatRef, IncomingMessage, SimulatedClientFactory, SimulatedDevice};
use switchboard_core::models::{Caller, ChatKind, Session};
use switchboard_core::store::{MemoryStore, PageRequest};
use switchboard_core::{Store, SwitchboardConfig};
use switchboard_server::SessionService;
use uuid::Uuid;

use self::faulty_store::FaultyStore;

pub struct TestEnv {
    pub service: SessionService,
    pub store: Arc<MemoryStore>,
    pub factory: Arc<SimulatedClientFactory>,
    pub config: SwitchboardConfig,
    pub auth: Arc<tempfile::TempDir>,
}

pub fn env() -> TestEnv {
    env_with(|_| {})
}

pub fn env_with(tweak: impl FnOnce(&mut SwitchboardConfig)) -> TestEnv {
    let auth = tempfile::tempdir().unwrap();
    let mut config = SwitchboardConfig::ephemeral(auth.path().to_string_lossy());
    tweak(&mut config);
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(SimulatedClientFactory::new());
    let service = SessionService::from_parts(store.clone(), factory.clone(), &config);
    TestEnv {
        service,
        store,
        factory,
        config,
        auth: Arc::new(auth),
    }
}

/// The service reaches the store through a [`FaultyStore`]; `store` is the
/// untouched backend underneath.
pub fn faulty_env() -> (TestEnv, Arc<FaultyStore>) {
    let auth = tempfile::tempdir().unwrap();
    let config = SwitchboardConfig::ephemeral(auth.path().to_string_lossy());
    let store = Arc::new(MemoryStore::new());
    let faults = Arc::new(FaultyStore::new(store.clone()));
    let factory = Arc::new(SimulatedClientFactory::new());
    let service = SessionService::from_parts(faults.clone(), factory.clone(), &config);
    let env = TestEnv {
        service,
        store,
        factory,
        config,
        auth: Arc::new(auth),
    };
    (env, faults)
}

impl TestEnv {
    /// Same store and artifact directory, fresh process state.
    pub fn restart(&self) -> TestEnv {
        let factory = Arc::new(SimulatedClientFactory::new());
        let service = SessionService::from_parts(self.store.clone(), factory.clone(), &self.config);
        TestEnv {
            service,
            store: self.store.clone(),
            factory,
            config: self.config.clone(),
            auth: self.auth.clone(),
        }
    }

    pub async fn device(&self, session_id: Uuid) -> SimulatedDevice {
        self.factory
            .device(session_id)
            .await
            .expect("no simulated device for session")
    }

    pub async fn session(&self, session_id: Uuid) -> Option<Session> {
        self.store.get_session(session_id).await.unwrap()
    }

    /// Create a session and complete pairing with `identity`.
    pub async fn connected_session(&self, admin: &Caller, identity: &str) -> Session {
        let view = self.service.create_session(admin).await.unwrap();
        let device = self.device(view.session.id).await;
        device.authenticate(identity, Some("Shop")).await.unwrap();
        let id = view.session.id;
        eventually("session to connect", move || async move {
            self.session(id).await.is_some_and(|s| s.is_connected)
        })
        .await;
        self.session(id).await.unwrap()
    }

    /// Deliver an inbound message and wait until it is stored.
    pub async fn deliver(&self, session: &Session, message: IncomingMessage) {
        let external_id = message.external_id.clone();
        self.device(session.id).await.receive(message).await.unwrap();
        let external_id = external_id.as_str();
        eventually("message to be stored", move || async move {
            self.store
                .message_exists(session.id, external_id)
                .await
                .unwrap()
        })
        .await;
    }

    pub async fn chat_id(&self, session: &Session, external_id: &str) -> Uuid {
        let chats = self
            .store
            .list_chats(
                session.tenant_id,
                session.id,
                &Default::default(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        chats
            .items
            .into_iter()
            .find(|c| c.external_id == external_id)
            .map(|c| c.id)
            .expect("chat not found")
    }
}

pub fn inbound(external_id: &str, chat: &str, body: &str) -> IncomingMessage {
    inbound_of_kind(external_id, chat, body, ChatKind::Individual)
}

pub fn inbound_of_kind(external_id: &str, chat: &str, body: &str, kind: ChatKind) -> IncomingMessage {
    IncomingMessage {
        external_id: external_id.to_string(),
        chat: ChatRef {
            external_id: chat.to_string(),
            name: Some(format!("Customer {}", chat)),
            kind,
        },
        sender_id: format!("{}-sender", chat),
        sender_name: Some("Customer".to_string()),
        body: body.to_string(),
        message_type: "text".to_string(),
        timestamp: Utc::now(),
        from_me: false,
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
