use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use porter_types::events::GatewayEvent;

/// Manages all connected clients and routes events to them.
///
/// Delivery is best-effort by design: a user without a live session simply
/// misses the event, and clients reconcile through the HTTP listings.
/// Persisted state, not the push channel, is the source of truth.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for marketplace-wide events — every connected
    /// client receives these
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender).
    /// One active session per user; a reconnect overwrites the entry.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    /// Transport-level chat room membership: room_id -> user ids.
    /// Independent of the persisted participant set.
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to marketplace-wide events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to every connected client.
    pub fn broadcast_all(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a session for a user. Returns (conn_id, receiver).
    /// Last write wins: a reconnect replaces the previous session's channel.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Tear down a session, but only if conn_id still owns the entry.
    /// A newer connection that already took over is left untouched.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        {
            let mut channels = self.inner.user_channels.write().await;
            match channels.get(&user_id) {
                Some((cid, _)) if *cid == conn_id => {
                    channels.remove(&user_id);
                }
                _ => return,
            }
        }

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&user_id);
            !members.is_empty()
        });
    }

    /// Subscribe a user's session to a chat room's events.
    /// A session may join any number of rooms.
    pub async fn join_room(&self, user_id: Uuid, room_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(user_id);
    }

    /// Send a targeted event to a specific user. No-op without a live session.
    pub async fn emit_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Deliver an event to every session currently joined to a room.
    pub async fn emit_to_room(&self, room_id: Uuid, event: GatewayEvent) {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&room_id) else {
            return;
        };
        let channels = self.inner.user_channels.read().await;
        for user_id in members {
            if let Some((_, tx)) = channels.get(user_id) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::Ready {
            user_id,
            name: "test".into(),
        }
    }

    #[tokio::test]
    async fn reconnect_overwrites_previous_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_old_conn, mut old_rx) = dispatcher.register(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register(user).await;

        dispatcher.emit_to_user(user, ready(user)).await;

        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_newer_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register(user).await;

        // The old connection's cleanup races in after the reconnect
        dispatcher.disconnect(user, old_conn).await;

        dispatcher.emit_to_user(user, ready(user)).await;
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn emit_to_absent_user_is_a_noop() {
        let dispatcher = Dispatcher::new();
        // Must not panic or block
        dispatcher.emit_to_user(Uuid::new_v4(), ready(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn room_events_reach_only_joined_sessions() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (_ca, mut rx_a) = dispatcher.register(a).await;
        let (_cb, mut rx_b) = dispatcher.register(b).await;
        let (_cc, mut rx_c) = dispatcher.register(c).await;

        dispatcher.join_room(a, room).await;
        dispatcher.join_room(b, room).await;

        dispatcher.emit_to_room(room, ready(a)).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_drops_room_membership() {
        let dispatcher = Dispatcher::new();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (conn, _rx) = dispatcher.register(user).await;
        dispatcher.join_room(user, room).await;
        dispatcher.disconnect(user, conn).await;

        // A fresh session has not re-joined the room, so it receives nothing
        let (_conn2, mut rx2) = dispatcher.register(user).await;
        dispatcher.emit_to_room(room, ready(user)).await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let dispatcher = Dispatcher::new();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();

        dispatcher.broadcast_all(ready(Uuid::new_v4()));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
