//! Wire events for the WebSocket protocol.

use serde::{Deserialize, Serialize};

use crate::session::{Message, SessionInfo};

/// Server → client events, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once on connect.
    SessionInfo { data: SessionInfo },
    /// Sent once on connect, after `session_info`.
    History { data: Vec<Message> },
    /// A message was appended to the session.
    Message { message: Message },
    /// Generation started (`true`) or finished (`false`).
    Typing { is_typing: bool },
}

/// Client → server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Chat { message: String },
}
