use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub kind: ChatKind,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_text: Option<String>,
    pub unread_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Individual,
    Group,
    /// Broadcast/status pseudo-chat.
    Status,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Individual => "individual",
            ChatKind::Group => "group",
            ChatKind::Status => "status",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ChatKind::Individual),
            "group" => Ok(ChatKind::Group),
            "status" => Ok(ChatKind::Status),
            other => Err(format!("unknown chat kind '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parses_stored_values() {
        for kind in [ChatKind::Individual, ChatKind::Group, ChatKind::Status] {
            assert_eq!(kind.as_str().parse::<ChatKind>().unwrap(), kind);
        }
        assert!("channel".parse::<ChatKind>().is_err());
    }
}
