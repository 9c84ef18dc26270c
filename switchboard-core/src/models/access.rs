use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessGrant {
    pub session_id: Uuid,
    pub manager_id: Uuid,
    pub tenant_id: Uuid,
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage_chats: bool,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
}

/// Permissions resolved for a caller on one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub manage_chats: bool,
}

impl Capabilities {
    pub const FULL: Capabilities = Capabilities {
        read: true,
        write: true,
        manage_chats: true,
    };

    pub const NONE: Capabilities = Capabilities {
        read: false,
        write: false,
        manage_chats: false,
    };
}

impl From<&AccessGrant> for Capabilities {
    fn from(grant: &AccessGrant) -> Self {
        Self {
            read: grant.can_read,
            write: grant.can_write,
            manage_chats: grant.can_manage_chats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Tenant administrator: implicit full access to every session of the tenant.
    Admin,
    /// Scoped manager: access only through grants.
    Manager,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identity of whoever invokes a session operation, as established by the fronting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: Uuid,
    pub role: Role,
    pub tenant_id: Uuid,
}

impl Caller {
    pub fn admin(id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            id,
            role: Role::Admin,
            tenant_id,
        }
    }

    pub fn manager(id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            id,
            role: Role::Manager,
            tenant_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
