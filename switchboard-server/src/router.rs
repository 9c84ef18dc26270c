use std::collections::HashMap;

use switchboard_core::error::ErrorKind;
use switchboard_core::ipc::{RealtimeEvent, RealtimeRequest, RealtimeResponse};
use switchboard_core::models::Caller;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::service::SessionService;
use crate::subsystems::notify::Topic;

/// Per-connection state: who is on the other end and which topics feed it.
pub struct Connection {
    caller: Option<Caller>,
    forwarders: HashMap<Topic, JoinHandle<()>>,
    outbound: mpsc::Sender<RealtimeResponse>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<RealtimeResponse>) -> Self {
        Self {
            caller: None,
            forwarders: HashMap::new(),
            outbound,
        }
    }

    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.forwarders.contains_key(&topic)
    }

    fn attach(&mut self, topic: Topic, rx: broadcast::Receiver<RealtimeEvent>) {
        let forwarder = spawn_forwarder(topic, rx, self.outbound.clone());
        if let Some(previous) = self.forwarders.insert(topic, forwarder) {
            previous.abort();
        }
    }

    fn detach(&mut self, topic: Topic) -> bool {
        match self.forwarders.remove(&topic) {
            Some(forwarder) => {
                forwarder.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every forwarder.
    pub fn close(&mut self) {
        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_forwarder(
    topic: Topic,
    mut rx: broadcast::Receiver<RealtimeEvent>,
    outbound: mpsc::Sender<RealtimeResponse>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if outbound.send(RealtimeResponse::Event(event)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "Realtime subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn not_identified() -> RealtimeResponse {
    RealtimeResponse::err(Some(ErrorKind::Forbidden), "send hello first")
}

pub async fn handle_request(
    request: RealtimeRequest,
    conn: &mut Connection,
    service: &SessionService,
) -> RealtimeResponse {
    match request {
        RealtimeRequest::Ping => RealtimeResponse::Pong,
        RealtimeRequest::Hello { caller } => {
            if conn.caller.is_some() {
                return RealtimeResponse::err(Some(ErrorKind::Invalid), "hello already received");
            }
            let rx = service.subscribe_tenant(&caller).await;
            conn.attach(Topic::Tenant(caller.tenant_id), rx);
            conn.caller = Some(caller);
            tracing::debug!(caller_id = %caller.id, tenant_id = %caller.tenant_id, "Realtime client identified");
            RealtimeResponse::ack("hello", None)
        }
        RealtimeRequest::Join { session_id } => {
            let Some(caller) = conn.caller else {
                return not_identified();
            };
            match service.join_session(&caller, session_id).await {
                Ok(rx) => {
                    conn.attach(Topic::Session(session_id), rx);
                    RealtimeResponse::ack("join", Some(session_id))
                }
                Err(e) => {
                    tracing::debug!(caller_id = %caller.id, session_id = %session_id, error = %e, "Join refused");
                    RealtimeResponse::err(Some(e.kind()), e.to_string())
                }
            }
        }
        RealtimeRequest::Leave { session_id } => {
            if conn.caller.is_none() {
                return not_identified();
            }
            if conn.detach(Topic::Session(session_id)) {
                service.leave_session(session_id).await;
            }
            RealtimeResponse::ack("leave", Some(session_id))
        }
    }
}
