//! Session registry: the shared map from live connections to their
//! authenticated identity and outbound message channel.
//!
//! Broadcasts take a snapshot of the matching senders under the lock and
//! deliver outside it, so a connection removed mid-broadcast just fails its
//! channel send and is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use palaver_shared::protocol::ServerMessage;
use palaver_shared::types::UserData;

/// Identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Entry {
    user: Option<UserData>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Mutex-guarded connection table.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<ConnId, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted, unauthenticated connection.
    pub async fn register(&self, conn_id: ConnId, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.inner.lock().await.insert(conn_id, Entry { user: None, tx });
    }

    /// Drop a connection. Returns the identity it was authenticated as,
    /// if any.
    pub async fn remove(&self, conn_id: ConnId) -> Option<UserData> {
        self.inner.lock().await.remove(&conn_id).and_then(|e| e.user)
    }

    /// Mark a connection as authenticated.
    pub async fn authenticate(&self, conn_id: ConnId, user: UserData) {
        if let Some(entry) = self.inner.lock().await.get_mut(&conn_id) {
            entry.user = Some(user);
        }
    }

    /// The identity a connection is authenticated as, if any.
    pub async fn user(&self, conn_id: ConnId) -> Option<UserData> {
        self.inner
            .lock()
            .await
            .get(&conn_id)
            .and_then(|e| e.user.clone())
    }

    /// Refresh the cached display name after a successful change.
    pub async fn set_display_name(&self, conn_id: ConnId, display_name: &str) {
        if let Some(entry) = self.inner.lock().await.get_mut(&conn_id) {
            if let Some(user) = entry.user.as_mut() {
                user.display_name = display_name.to_string();
            }
        }
    }

    /// Send an event to every authenticated connection of the given users,
    /// excluding one connection (normally the sender's).
    pub async fn send_to_users(&self, user_ids: &[i64], exclude: ConnId, msg: &ServerMessage) {
        let targets: Vec<(ConnId, mpsc::UnboundedSender<ServerMessage>)> = {
            let table = self.inner.lock().await;
            table
                .iter()
                .filter(|(id, entry)| {
                    **id != exclude
                        && entry
                            .user
                            .as_ref()
                            .is_some_and(|u| user_ids.contains(&u.user_id))
                })
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect()
        };

        deliver(targets, msg);
    }

    /// Send an event to every other connection, authenticated or not.
    pub async fn send_to_all(&self, exclude: ConnId, msg: &ServerMessage) {
        let targets: Vec<(ConnId, mpsc::UnboundedSender<ServerMessage>)> = {
            let table = self.inner.lock().await;
            table
                .iter()
                .filter(|(id, _)| **id != exclude)
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect()
        };

        deliver(targets, msg);
    }

    /// Number of currently tracked connections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

fn deliver(targets: Vec<(ConnId, mpsc::UnboundedSender<ServerMessage>)>, msg: &ServerMessage) {
    for (conn_id, tx) in targets {
        if tx.send(msg.clone()).is_err() {
            // Connection went away between snapshot and send.
            debug!(%conn_id, "skipping broadcast to closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_shared::types::MessageType;

    fn user(id: i64, name: &str) -> UserData {
        UserData {
            user_id: id,
            username: name.to_string(),
            display_name: name.to_string(),
        }
    }

    fn new_message() -> ServerMessage {
        ServerMessage::NewMessage {
            chat_id: 1,
            sender_id: 1,
            sender_name: "alice".into(),
            content: "hi".into(),
            encrypted_content: None,
            message_type: MessageType::Normal,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn authentication_state_tracked_per_connection() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnId::next();

        registry.register(conn, tx).await;
        assert!(registry.user(conn).await.is_none());

        registry.authenticate(conn, user(7, "alice")).await;
        assert_eq!(registry.user(conn).await.unwrap().user_id, 7);

        registry.set_display_name(conn, "Alicia").await;
        assert_eq!(registry.user(conn).await.unwrap().display_name, "Alicia");

        let removed = registry.remove(conn).await.unwrap();
        assert_eq!(removed.username, "alice");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn send_to_users_targets_participants_only() {
        let registry = SessionRegistry::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();

        let alice = ConnId::next();
        let bob = ConnId::next();
        let carol = ConnId::next();
        registry.register(alice, alice_tx).await;
        registry.register(bob, bob_tx).await;
        registry.register(carol, carol_tx).await;
        registry.authenticate(alice, user(1, "alice")).await;
        registry.authenticate(bob, user(2, "bob")).await;
        registry.authenticate(carol, user(3, "carol")).await;

        registry.send_to_users(&[1, 2], alice, &new_message()).await;

        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err(), "sender must not receive");
        assert!(carol_rx.try_recv().is_err(), "non-participant must not receive");
    }

    #[tokio::test]
    async fn broadcast_tolerates_closed_receiver() {
        let registry = SessionRegistry::new();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        drop(dead_rx);

        let dead = ConnId::next();
        let live = ConnId::next();
        registry.register(dead, dead_tx).await;
        registry.register(live, live_tx).await;

        registry.send_to_all(ConnId::next(), &new_message()).await;
        assert!(live_rx.try_recv().is_ok());
    }
}
