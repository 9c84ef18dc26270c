use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

static IDENTITY_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Canonical form of a paired phone identity.
///
/// Drivers report identities as `<digits>@<server>` or with separators; the
/// store keeps only an optional leading `+` followed by digits. Returns `None`
/// for anything that does not look like a phone number.
pub fn normalize_identity(raw: &str) -> Option<String> {
    let user = raw.split('@').next().unwrap_or(raw);
    let user = user.split(':').next().unwrap_or(user);
    let compact: String = user
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect();
    let re = IDENTITY_PATTERN
        .get_or_init(|| Regex::new(r"^\+?[0-9]{3,20}$").ok())
        .as_ref()?;
    re.is_match(&compact).then_some(compact)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub admin_id: Uuid,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub is_connected: bool,
    pub pairing_code: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle position of a session, derived from its stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    AwaitingPairing,
    Connected,
    Disconnected,
    Destroyed,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if !self.is_active {
            SessionState::Destroyed
        } else if self.is_connected {
            SessionState::Connected
        } else if self.pairing_code.is_some() {
            SessionState::AwaitingPairing
        } else if self.phone_number.is_some() {
            SessionState::Disconnected
        } else {
            SessionState::Pending
        }
    }

    /// Never paired with an external identity.
    pub fn is_placeholder(&self) -> bool {
        self.phone_number.is_none()
    }
}
