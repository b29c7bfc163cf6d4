//! Chat sessions and their transcripts.
//!
//! Sessions live in memory: a `RwLock<HashMap>` maps session ids to
//! individually locked [`Session`] values, so appends to one session never
//! block another, and appends within a session are serialized. A periodic
//! sweep drops sessions inactive longer than the configured age.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry. Assistant messages carry `model` and `top_k`
/// metadata on success, or `error: true` on failure.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl Message {
    fn new(role: Role, content: String, metadata: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .get("error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
        }
    }
}

/// Summary exposed over the API and on WebSocket connect.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh id.
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(Session::new(id.clone()))));
        debug!(session_id = %id, "created session");
        id
    }

    /// Adopt a caller-supplied id, creating the session if it is new.
    pub async fn ensure(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id.to_string()))));
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn info(&self, id: &str) -> Option<SessionInfo> {
        let session = {
            let sessions = self.sessions.read().await;
            Arc::clone(sessions.get(id)?)
        };
        let session = session.lock().await;
        Some(SessionInfo {
            session_id: session.id.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            message_count: session.messages.len(),
        })
    }

    /// Append a message and bump the session's activity timestamp.
    pub async fn append(
        &self,
        id: &str,
        role: Role,
        content: String,
        metadata: Map<String, Value>,
    ) -> Result<Message, SessionError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(id)
                .cloned()
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?
        };
        let mut session = session.lock().await;
        let message = Message::new(role, content, metadata);
        session.messages.push(message.clone());
        session.last_activity = Utc::now();
        Ok(message)
    }

    /// The last `limit` messages, oldest first. `None` returns everything.
    pub async fn history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(id)
                .cloned()
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?
        };
        let session = session.lock().await;
        let skip = match limit {
            Some(limit) => session.messages.len().saturating_sub(limit),
            None => 0,
        };
        Ok(session.messages[skip..].to_vec())
    }

    /// Remove sessions whose last activity is older than `max_age`,
    /// returning the removed ids so connections can be detached.
    pub async fn sweep(&self, max_age: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.sessions.write().await;
        let mut removed = Vec::new();
        let mut kept = HashMap::new();
        for (id, session) in sessions.drain() {
            let expired = session.lock().await.last_activity < cutoff;
            if expired {
                removed.push(id);
            } else {
                kept.insert(id, session);
            }
        }
        *sessions = kept;
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, age: Duration) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(id) {
            session.lock().await.last_activity = Utc::now() - age;
        }
    }
}
