//! Realtime socket wire types.
//!
//! Frames are MessagePack maps behind a 4-byte little-endian length prefix.
//! A connection opens with `hello`, is subscribed to its tenant topic, and
//! may then `join`/`leave` session topics. Pushes arrive as `event` frames.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::models::Caller;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RealtimeRequest {
    Hello { caller: Caller },
    Join { session_id: Uuid },
    Leave { session_id: Uuid },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStatus,
    ChatUpdated,
    NewMessage,
}

/// One push delivered to subscribers of a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: EventKind,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeResponse {
    Ack {
        action: String,
        session_id: Option<Uuid>,
    },
    Error {
        kind: Option<ErrorKind>,
        message: String,
    },
    Event(RealtimeEvent),
    Pong,
}

impl RealtimeResponse {
    pub fn ack(action: &str, session_id: Option<Uuid>) -> Self {
        Self::Ack {
            action: action.to_string(),
            session_id,
        }
    }

    pub fn err(kind: Option<ErrorKind>, msg: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: msg.into(),
        }
    }
}
