//! Fan-out of session events to live WebSocket connections.
//!
//! Each connection registers an unbounded sender; broadcasting clones the
//! event into every sender for the session and prunes connections whose
//! receiver has gone away. A dead connection is never an error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::events::ServerEvent;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(Uuid);

struct Connection {
    id: ConnectionId,
    tx: EventSender,
}

#[derive(Clone, Default)]
pub struct ConnectionBroadcaster {
    connections: Arc<RwLock<HashMap<String, Vec<Connection>>>>,
}

impl ConnectionBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, session_id: &str, tx: EventSender) -> ConnectionId {
        let id = ConnectionId(Uuid::new_v4());
        self.connections
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(Connection { id, tx });
        debug!(session_id, "connection attached");
        id
    }

    /// Remove one connection. Idempotent.
    pub async fn detach(&self, session_id: &str, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(session_id) {
            list.retain(|c| c.id != connection_id);
            if list.is_empty() {
                connections.remove(session_id);
            }
        }
    }

    /// Drop every connection of a session (used when the session is swept).
    pub async fn detach_session(&self, session_id: &str) {
        self.connections.write().await.remove(session_id);
    }

    /// Send `event` to every live connection of the session, pruning any
    /// whose receiver was dropped.
    pub async fn broadcast(&self, session_id: &str, event: ServerEvent) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(session_id) {
            list.retain(|c| c.tx.send(event.clone()).is_ok());
            if list.is_empty() {
                connections.remove(session_id);
            }
        }
    }

    pub async fn connection_count(&self, session_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(session_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_connections() {
        let broadcaster = ConnectionBroadcaster::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        broadcaster.attach("s1", tx1).await;
        broadcaster.attach("s1", tx2).await;

        broadcaster
            .broadcast("s1", ServerEvent::Typing { is_typing: true })
            .await;
        assert!(matches!(
            rx1.recv().await,
            Some(ServerEvent::Typing { is_typing: true })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(ServerEvent::Typing { is_typing: true })
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_silently() {
        let broadcaster = ConnectionBroadcaster::new();
        let (tx, rx) = mpsc::unbounded_channel();
        broadcaster.attach("s1", tx).await;
        drop(rx);

        broadcaster
            .broadcast("s1", ServerEvent::Typing { is_typing: false })
            .await;
        assert_eq!(broadcaster.connection_count("s1").await, 0);
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let broadcaster = ConnectionBroadcaster::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = broadcaster.attach("s1", tx).await;

        broadcaster.detach("s1", id).await;
        broadcaster.detach("s1", id).await;
        assert_eq!(broadcaster.connection_count("s1").await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_is_scoped_to_the_session() {
        let broadcaster = ConnectionBroadcaster::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        broadcaster.attach("s1", tx1).await;
        broadcaster.attach("s2", tx2).await;

        broadcaster
            .broadcast("s1", ServerEvent::Typing { is_typing: true })
            .await;
        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }
}
