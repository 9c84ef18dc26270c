//! Access Control Gate
//!
//! Administrators get full capabilities on every active session of their own
//! tenant. Managers get exactly what their grant row says, and nothing without
//! one. Lookup failures deny.

use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::models::{Caller, Capabilities, Session};
use switchboard_core::Store;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub capabilities: Capabilities,
}

impl AccessDecision {
    pub const DENIED: AccessDecision = AccessDecision {
        allowed: false,
        capabilities: Capabilities::NONE,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    ManageChats,
}

impl Capability {
    pub fn granted_by(self, caps: &Capabilities) -> bool {
        match self {
            Capability::Read => caps.read,
            Capability::Write => caps.write,
            Capability::ManageChats => caps.manage_chats,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::ManageChats => "manage chats",
        }
    }
}

pub async fn check_access(store: &dyn Store, session_id: Uuid, caller: &Caller) -> AccessDecision {
    if caller.is_admin() {
        return match store.get_tenant_session(caller.tenant_id, session_id).await {
            Ok(Some(session)) if session.is_active => AccessDecision {
                allowed: true,
                capabilities: Capabilities::FULL,
            },
            Ok(_) => AccessDecision::DENIED,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Access lookup failed, denying");
                AccessDecision::DENIED
            }
        };
    }

    match store.find_grant(caller.tenant_id, session_id, caller.id).await {
        Ok(Some(grant)) => AccessDecision {
            allowed: true,
            capabilities: Capabilities::from(&grant),
        },
        Ok(None) => AccessDecision::DENIED,
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                manager_id = %caller.id,
                error = %e,
                "Grant lookup failed, denying"
            );
            AccessDecision::DENIED
        }
    }
}

/// Resolve the caller's capabilities, failing with `Forbidden` unless `needed` is among them.
pub async fn require(
    store: &dyn Store,
    session_id: Uuid,
    caller: &Caller,
    needed: Capability,
) -> Result<Capabilities> {
    let decision = check_access(store, session_id, caller).await;
    if decision.allowed && needed.granted_by(&decision.capabilities) {
        Ok(decision.capabilities)
    } else {
        Err(SwitchboardError::Forbidden(format!(
            "caller {} may not {} session {}",
            caller.id,
            needed.as_str(),
            session_id
        )))
    }
}

/// Administrative operations: the caller must administer the session's tenant.
///
/// Unlike [`check_access`] this accepts inactive sessions, so teardown stays
/// repeatable.
pub async fn require_admin(store: &dyn Store, session_id: Uuid, caller: &Caller) -> Result<Session> {
    if !caller.is_admin() {
        return Err(SwitchboardError::Forbidden(format!(
            "caller {} is not a tenant administrator",
            caller.id
        )));
    }
    store
        .get_tenant_session(caller.tenant_id, session_id)
        .await?
        .ok_or_else(|| SwitchboardError::NotFound(format!("session {}", session_id)))
}
