use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use courier_types::events::GatewayEvent;

/// Outcome of a push attempt. A miss is normal: the receiver is offline or
/// its socket went away between lookup and send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pushed,
    Missed,
}

/// Live push channel of one registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event for this connection. Events queued on one handle are
    /// delivered in the order they were pushed.
    pub fn push(&self, event: GatewayEvent) -> Delivery {
        match self.tx.send(event) {
            Ok(()) => Delivery::Pushed,
            Err(_) => Delivery::Missed,
        }
    }
}

/// Maps each online user to exactly one live connection, and tells every
/// connection who is online whenever that mapping changes.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> current connection. Last connection wins.
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`, replacing any previous one.
    /// Returns the new connection id and the receiving end of its push queue.
    ///
    /// The replaced handle is dropped, which closes the old connection's queue.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut connections = self.inner.connections.write().await;
        if let Some(old) = connections.insert(user_id, ConnectionHandle { conn_id, tx }) {
            debug!("{} replaced connection {} with {}", user_id, old.conn_id, conn_id);
        }

        // Still under the write lock: nobody can observe an older set afterwards.
        broadcast_online(&connections);

        (conn_id, rx)
    }

    /// Remove `user_id`'s entry, but only if `conn_id` is still the one on
    /// record. Returns false for a stale unregister, which changes nothing.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;

        let is_current = connections
            .get(&user_id)
            .is_some_and(|handle| handle.conn_id == conn_id);
        if !is_current {
            debug!("{} stale unregister of {} ignored", user_id, conn_id);
            return false;
        }

        connections.remove(&user_id);
        broadcast_online(&connections);
        true
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.connections.read().await.get(&user_id).cloned()
    }

    /// Sorted snapshot of online user ids.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        sorted_ids(&*self.inner.connections.read().await)
    }
}

fn sorted_ids(connections: &HashMap<Uuid, ConnectionHandle>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = connections.keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Send the full online set to every registered connection.
fn broadcast_online(connections: &HashMap<Uuid, ConnectionHandle>) {
    let event = GatewayEvent::OnlineUsers {
        user_ids: sorted_ids(connections),
    };
    for handle in connections.values() {
        let _ = handle.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_set(event: GatewayEvent) -> Vec<Uuid> {
        match event {
            GatewayEvent::OnlineUsers { user_ids } => user_ids,
            other => panic!("expected OnlineUsers, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn register_broadcasts_set_including_self() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (_, mut rx_a) = registry.register(a).await;
        assert_eq!(online_set(rx_a.recv().await.unwrap()), vec![a]);

        let (_, mut rx_b) = registry.register(b).await;
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(online_set(rx_b.recv().await.unwrap()), expected);
        assert_eq!(online_set(rx_a.recv().await.unwrap()), expected);
    }

    #[tokio::test]
    async fn reconnect_replaces_entry_without_duplicates() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (_, mut rx_a) = registry.register(a).await;
        let (old_conn, mut old_rx) = registry.register(b).await;
        let (new_conn, mut new_rx) = registry.register(b).await;
        assert_ne!(old_conn, new_conn);

        let mut expected = vec![a, b];
        expected.sort();

        // a saw: [a], [a, b], [a, b] -- b only ever once.
        rx_a.recv().await.unwrap();
        assert_eq!(online_set(rx_a.recv().await.unwrap()), expected);
        assert_eq!(online_set(rx_a.recv().await.unwrap()), expected);
        assert_eq!(online_set(new_rx.recv().await.unwrap()), expected);

        assert_eq!(registry.lookup(b).await.unwrap().conn_id(), new_conn);

        // The superseded queue drains and then closes.
        while old_rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_entry() {
        let registry = ConnectionRegistry::new();
        let b = Uuid::new_v4();

        let (old_conn, _old_rx) = registry.register(b).await;
        let (new_conn, mut new_rx) = registry.register(b).await;
        new_rx.recv().await.unwrap();

        assert!(!registry.unregister(b, old_conn).await);
        assert_eq!(registry.lookup(b).await.unwrap().conn_id(), new_conn);
        assert_eq!(registry.online_user_ids().await, vec![b]);
        // Nothing was broadcast for the stale unregister.
        assert!(new_rx.try_recv().is_err());

        assert!(registry.unregister(b, new_conn).await);
        assert!(registry.lookup(b).await.is_none());
    }

    #[tokio::test]
    async fn unregister_broadcasts_remaining_set() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (_, mut rx_a) = registry.register(a).await;
        let (conn_b, _rx_b) = registry.register(b).await;
        rx_a.recv().await.unwrap();
        rx_a.recv().await.unwrap();

        assert!(registry.unregister(b, conn_b).await);
        assert_eq!(online_set(rx_a.recv().await.unwrap()), vec![a]);
        assert_eq!(registry.online_user_ids().await, vec![a]);
    }

    #[tokio::test]
    async fn push_to_closed_connection_is_a_miss() {
        let registry = ConnectionRegistry::new();
        let a = Uuid::new_v4();

        let (_, rx) = registry.register(a).await;
        drop(rx);

        let handle = registry.lookup(a).await.unwrap();
        assert_eq!(handle.push(GatewayEvent::Ready { user_id: a }), Delivery::Missed);
    }

    #[tokio::test]
    async fn concurrent_connects_settle_to_one_entry_per_user() {
        let registry = ConnectionRegistry::new();
        let users: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();

        let mut tasks = Vec::new();
        for &user in &users {
            for _ in 0..4 {
                let registry = registry.clone();
                tasks.push(tokio::spawn(async move {
                    let (conn_id, rx) = registry.register(user).await;
                    (user, conn_id, rx)
                }));
            }
        }

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        let mut expected = users.clone();
        expected.sort();
        assert_eq!(registry.online_user_ids().await, expected);

        // Every stale unregister is a no-op; current ones empty the registry.
        for (user, conn_id, _) in &receivers {
            let current = registry
                .lookup(*user)
                .await
                .is_some_and(|handle| handle.conn_id() == *conn_id);
            assert_eq!(registry.unregister(*user, *conn_id).await, current);
        }
        assert!(registry.online_user_ids().await.is_empty());
    }
}
