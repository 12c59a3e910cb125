use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type Outbound = mpsc::UnboundedSender<Message>;

/// In-process broadcast-group dispatcher: every connection joined to a room
/// receives every message sent to it.
///
/// Membership is keyed by connection id; a connection whose outbound channel
/// has closed is pruned on the next broadcast, so a crashed connection task
/// cannot wedge a room.
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, HashMap<ConnectionId, Outbound>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub async fn join(&self, room: &str, conn_id: ConnectionId, outbound: Outbound) {
        let mut groups = self.groups.write().await;
        groups
            .entry(room.to_string())
            .or_default()
            .insert(conn_id, outbound);
    }

    pub async fn leave(&self, room: &str, conn_id: ConnectionId) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                groups.remove(room);
            }
        }
    }

    /// Sends `text` to every member of `room`; returns the delivery count.
    pub async fn broadcast(&self, room: &str, text: &str) -> usize {
        let mut dead = Vec::new();
        let delivered = {
            let groups = self.groups.read().await;
            let Some(members) = groups.get(room) else {
                return 0;
            };
            let mut delivered = 0;
            for (conn_id, outbound) in members {
                if outbound.send(Message::Text(text.to_string())).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*conn_id);
                }
            }
            delivered
        };

        for conn_id in dead {
            self.leave(room, conn_id).await;
        }
        delivered
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.groups
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_members_of_the_room_only() {
        let registry = GroupRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        registry.join("trip_1", Uuid::new_v4(), tx_a).await;
        registry.join("trip_1", Uuid::new_v4(), tx_b).await;
        registry.join("trip_2", Uuid::new_v4(), tx_c).await;

        assert_eq!(registry.broadcast("trip_1", "hello").await, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_removes_membership() {
        let registry = GroupRegistry::new();
        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.join("trip_1", conn_id, tx).await;
        assert_eq!(registry.member_count("trip_1").await, 1);

        registry.leave("trip_1", conn_id).await;
        assert_eq!(registry.member_count("trip_1").await, 0);
        assert_eq!(registry.broadcast("trip_1", "x").await, 0);
    }

    #[tokio::test]
    async fn closed_channels_are_pruned_on_broadcast() {
        let registry = GroupRegistry::new();
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join("trip_1", conn_id, tx).await;
        drop(rx);

        assert_eq!(registry.broadcast("trip_1", "x").await, 0);
        assert_eq!(registry.member_count("trip_1").await, 0);
    }
}
