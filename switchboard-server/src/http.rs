//! Switchboard HTTP API
//!
//! Axum adapter over [`SessionService`]. It runs alongside the realtime
//! socket on port 8780 (configurable). The fronting layer authenticates
//! callers and passes their identity in headers:
//!
//! - `x-caller-id`   user id
//! - `x-caller-role` `admin` or `manager`
//! - `x-tenant-id`   the caller's tenant
//!
//! Each endpoint has a thin axum handler that delegates to an inner function.
//! Inner functions take the service and a resolved caller and are testable
//! without axum dispatch.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /version
//! - POST   /sessions                                   open a session
//! - GET    /sessions                                   list visible sessions
//! - DELETE /sessions/:session_id                       destroy
//! - GET    /sessions/:session_id/pairing               pairing image and connection flag
//! - GET    /sessions/:session_id/access                list grants
//! - PUT    /sessions/:session_id/access/:manager_id    grant / update
//! - DELETE /sessions/:session_id/access/:manager_id    revoke
//! - GET    /sessions/:session_id/chats                 list chats
//! - GET    /sessions/:session_id/chats/:chat_id/messages
//! - POST   /sessions/:session_id/chats/:chat_id/messages
//! - POST   /sessions/:session_id/chats/:chat_id/read

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use switchboard_core::error::{ErrorKind, SwitchboardError};
use switchboard_core::models::{Caller, Capabilities, ChatKind, Role};
use switchboard_core::store::{ChatFilter, PageRequest, DEFAULT_PAGE_SIZE};
use switchboard_core::SwitchboardConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::service::SessionService;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: SessionService,
    pub config: SwitchboardConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", post(create_session_handler).get(list_sessions_handler))
        .route("/sessions/:session_id", delete(destroy_session_handler))
        .route("/sessions/:session_id/pairing", get(pairing_handler))
        .route("/sessions/:session_id/access", get(list_access_handler))
        .route(
            "/sessions/:session_id/access/:manager_id",
            put(grant_access_handler).delete(revoke_access_handler),
        )
        .route("/sessions/:session_id/chats", get(list_chats_handler))
        .route(
            "/sessions/:session_id/chats/:chat_id/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route("/sessions/:session_id/chats/:chat_id/read", post(mark_read_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    service: SessionService,
    config: SwitchboardConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { service, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Switchboard HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ChatListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub search: Option<String>,
    pub kind: Option<ChatKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ChatListQuery {
    fn split(self) -> (ChatFilter, PageRequest) {
        (
            ChatFilter {
                unread_only: self.unread_only,
                search: self.search,
                kind: self.kind,
            },
            page_request(self.page, self.per_page),
        )
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GrantRequest {
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub can_manage_chats: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub body: Option<String>,
}

fn page_request(page: Option<u32>, per_page: Option<u32>) -> PageRequest {
    PageRequest::new(page.unwrap_or(1), per_page.unwrap_or(DEFAULT_PAGE_SIZE))
}

// ============================================================================
// Caller resolution and error mapping
// ============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Read the caller identity asserted by the fronting layer.
pub fn caller_from_headers(headers: &HeaderMap) -> std::result::Result<Caller, (StatusCode, serde_json::Value)> {
    let unauthorized = |msg: String| {
        (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": msg, "status": "error" }),
        )
    };
    let parse_id = |name: &str| -> std::result::Result<Uuid, (StatusCode, serde_json::Value)> {
        let raw = header_str(headers, name).ok_or_else(|| unauthorized(format!("missing {} header", name)))?;
        Uuid::parse_str(raw).map_err(|_| unauthorized(format!("{} is not a valid id", name)))
    };

    let id = parse_id(CALLER_ID_HEADER)?;
    let tenant_id = parse_id(TENANT_ID_HEADER)?;
    let role: Role = header_str(headers, CALLER_ROLE_HEADER)
        .ok_or_else(|| unauthorized(format!("missing {} header", CALLER_ROLE_HEADER)))?
        .parse()
        .map_err(unauthorized)?;
    Ok(Caller { id, role, tenant_id })
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ExternalFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
    }
}

fn error_body(err: &SwitchboardError) -> (StatusCode, serde_json::Value) {
    let kind = err.kind();
    if kind == ErrorKind::ExternalFailure {
        tracing::error!("Request failed: {}", err);
    }
    (
        status_for(kind),
        serde_json::json!({
            "error": err.to_string(),
            "kind": kind,
            "status": "error",
        }),
    )
}

fn respond<T: Serialize>(
    result: switchboard_core::error::Result<T>,
    ok: StatusCode,
) -> (StatusCode, serde_json::Value) {
    match result {
        Ok(value) => (ok, serde_json::json!(value)),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(service: &SessionService, socket_path: &str) -> (StatusCode, serde_json::Value) {
    let live = service.controller().registry().len().await;
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "live_sessions": live,
            "socket": socket_path,
        }),
    )
}

/// Inner version: version info, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "switchboard/1",
    })
}

pub async fn create_session_inner(service: &SessionService, caller: &Caller) -> (StatusCode, serde_json::Value) {
    respond(service.create_session(caller).await, StatusCode::CREATED)
}

pub async fn list_sessions_inner(service: &SessionService, caller: &Caller) -> (StatusCode, serde_json::Value) {
    respond(service.list_sessions(caller).await, StatusCode::OK)
}

pub async fn destroy_session_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    let result = service
        .destroy_session(caller, session_id)
        .await
        .map(|()| serde_json::json!({ "session_id": session_id, "destroyed": true }));
    respond(result, StatusCode::OK)
}

pub async fn pairing_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(service.get_pairing_artifact(caller, session_id).await, StatusCode::OK)
}

pub async fn list_access_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(service.list_access(caller, session_id).await, StatusCode::OK)
}

pub async fn grant_access_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    manager_id: Uuid,
    req: GrantRequest,
) -> (StatusCode, serde_json::Value) {
    let capabilities = Capabilities {
        read: req.can_read,
        write: req.can_write,
        manage_chats: req.can_manage_chats,
    };
    respond(
        service
            .grant_access(caller, session_id, manager_id, capabilities)
            .await,
        StatusCode::OK,
    )
}

pub async fn revoke_access_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    manager_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    let result = service
        .revoke_access(caller, session_id, manager_id)
        .await
        .map(|()| serde_json::json!({ "revoked": true }));
    respond(result, StatusCode::OK)
}

pub async fn list_chats_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    query: ChatListQuery,
) -> (StatusCode, serde_json::Value) {
    let (filter, page) = query.split();
    respond(
        service.list_chats(caller, session_id, &filter, page).await,
        StatusCode::OK,
    )
}

pub async fn list_messages_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    chat_id: Uuid,
    query: PageQuery,
) -> (StatusCode, serde_json::Value) {
    let page = page_request(query.page, query.per_page);
    respond(
        service.list_messages(caller, session_id, chat_id, page).await,
        StatusCode::OK,
    )
}

pub async fn send_message_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    chat_id: Uuid,
    req: SendRequest,
) -> (StatusCode, serde_json::Value) {
    let body = req.body.unwrap_or_default();
    respond(
        service.send_message(caller, session_id, chat_id, &body).await,
        StatusCode::CREATED,
    )
}

pub async fn mark_read_inner(
    service: &SessionService,
    caller: &Caller,
    session_id: Uuid,
    chat_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(
        service.mark_chat_read(caller, session_id, chat_id).await,
        StatusCode::OK,
    )
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

type Reply = (StatusCode, Json<serde_json::Value>);

fn reply((status, body): (StatusCode, serde_json::Value)) -> Reply {
    (status, Json(body))
}

macro_rules! caller_or_reply {
    ($headers:expr) => {
        match caller_from_headers(&$headers) {
            Ok(caller) => caller,
            Err(rejection) => return reply(rejection),
        }
    };
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    reply(health_inner(&state.service, &state.config.service.socket_path).await)
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn create_session_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(create_session_inner(&state.service, &caller).await)
}

pub async fn list_sessions_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(list_sessions_inner(&state.service, &caller).await)
}

pub async fn destroy_session_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(destroy_session_inner(&state.service, &caller, session_id).await)
}

pub async fn pairing_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(pairing_inner(&state.service, &caller, session_id).await)
}

pub async fn list_access_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(list_access_inner(&state.service, &caller, session_id).await)
}

pub async fn grant_access_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((session_id, manager_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<GrantRequest>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(grant_access_inner(&state.service, &caller, session_id, manager_id, req).await)
}

pub async fn revoke_access_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((session_id, manager_id)): Path<(Uuid, Uuid)>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(revoke_access_inner(&state.service, &caller, session_id, manager_id).await)
}

pub async fn list_chats_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ChatListQuery>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(list_chats_inner(&state.service, &caller, session_id, query).await)
}

pub async fn list_messages_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((session_id, chat_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<PageQuery>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(list_messages_inner(&state.service, &caller, session_id, chat_id, query).await)
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((session_id, chat_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SendRequest>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(send_message_inner(&state.service, &caller, session_id, chat_id, req).await)
}

pub async fn mark_read_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path((session_id, chat_id)): Path<(Uuid, Uuid)>,
) -> Reply {
    let caller = caller_or_reply!(headers);
    reply(mark_read_inner(&state.service, &caller, session_id, chat_id).await)
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use switchboard_core::client::SimulatedClientFactory;
    use switchboard_core::store::MemoryStore;

    fn make_service() -> (SessionService, tempfile::TempDir) {
        let auth = tempfile::tempdir().unwrap();
        let config = SwitchboardConfig::ephemeral(auth.path().to_string_lossy());
        let service = SessionService::from_parts(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedClientFactory::new()),
            &config,
        );
        (service, auth)
    }

    fn headers(id: Uuid, role: &str, tenant: Uuid) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CALLER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        h.insert(CALLER_ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        h.insert(TENANT_ID_HEADER, HeaderValue::from_str(&tenant.to_string()).unwrap());
        h
    }

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "switchboard/1");
    }

    // ========================================================================
    // TEST 2: caller headers parse, role is case-insensitive
    // ========================================================================
    #[test]
    fn test_caller_from_headers() {
        let id = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let caller = caller_from_headers(&headers(id, "Manager", tenant)).unwrap();
        assert_eq!(caller, Caller::manager(id, tenant));
    }

    // ========================================================================
    // TEST 3: missing or malformed caller headers are rejected
    // ========================================================================
    #[test]
    fn test_caller_from_headers_rejects_bad_input() {
        let (status, body) = caller_from_headers(&HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(CALLER_ID_HEADER));

        let mut h = headers(Uuid::new_v4(), "owner", Uuid::new_v4());
        assert!(caller_from_headers(&h).is_err());

        h.insert(CALLER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        h.insert(CALLER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert!(caller_from_headers(&h).is_err());
    }

    // ========================================================================
    // TEST 4: error kinds map onto HTTP statuses
    // ========================================================================
    #[test]
    fn test_status_for_kinds() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::ExternalFailure), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Invalid), StatusCode::BAD_REQUEST);
    }

    // ========================================================================
    // TEST 5: create then conflict
    // ========================================================================
    #[tokio::test]
    async fn test_create_session_inner_conflict() {
        let (service, _auth) = make_service();
        let admin = Caller::admin(Uuid::new_v4(), Uuid::new_v4());

        let (status, body) = create_session_inner(&service, &admin).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["state"], "pending");
        assert_eq!(body["live"], true);

        let (status, body) = create_session_inner(&service, &admin).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");
    }

    // ========================================================================
    // TEST 6: managers cannot open sessions
    // ========================================================================
    #[tokio::test]
    async fn test_create_session_inner_manager_forbidden() {
        let (service, _auth) = make_service();
        let manager = Caller::manager(Uuid::new_v4(), Uuid::new_v4());
        let (status, _) = create_session_inner(&service, &manager).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // ========================================================================
    // TEST 7: send with empty body is invalid
    // ========================================================================
    #[tokio::test]
    async fn test_send_message_inner_empty_body() {
        let (service, _auth) = make_service();
        let admin = Caller::admin(Uuid::new_v4(), Uuid::new_v4());
        let (_, created) = create_session_inner(&service, &admin).await;
        let session_id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();

        let (status, body) = send_message_inner(
            &service,
            &admin,
            session_id,
            Uuid::new_v4(),
            SendRequest { body: Some("  ".to_string()) },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid");
    }

    // ========================================================================
    // TEST 8: health reports live sessions
    // ========================================================================
    #[tokio::test]
    async fn test_health_inner_counts_live_sessions() {
        let (service, _auth) = make_service();
        let admin = Caller::admin(Uuid::new_v4(), Uuid::new_v4());
        let _ = create_session_inner(&service, &admin).await;

        let (status, body) = health_inner(&service, "/tmp/switchboard.sock").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["live_sessions"], 1);
        assert_eq!(body["socket"], "/tmp/switchboard.sock");
    }
}
