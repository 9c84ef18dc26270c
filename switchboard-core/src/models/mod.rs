pub mod access;
pub mod chat;
pub mod message;
pub mod session;

pub use access::{AccessGrant, Caller, Capabilities, Role};
pub use chat::{Chat, ChatKind};
pub use message::Message;
pub use session::{normalize_identity, Session, SessionState};
