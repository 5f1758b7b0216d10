//! Notification Fanout
//!
//! Delivers a payload to every live connection whose rooms intersect the
//! target set. Fire-and-forget: offline subscribers get nothing here (the
//! persisted notification archive is their catch-up path), and a failed
//! write to one subscriber never affects the others or the caller.

use std::sync::Arc;

use shared::NotificationPayload;
use shared::message::BusMessage;
use shared::roles::ALL_ROOM;

use crate::realtime::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct NotificationFanout {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationFanout {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `payload` to every connection in any of `rooms`
    ///
    /// 空目标集不是丢弃而是降级: 记日志并广播到 `all` 房间。
    /// Returns how many subscribers the payload reached.
    pub async fn deliver(&self, rooms: &[String], payload: &NotificationPayload) -> usize {
        let broadcast_fallback;
        let target_rooms: &[String] = if rooms.is_empty() {
            tracing::warn!(
                title = %payload.title,
                "Notification without target rooms, broadcasting to everyone"
            );
            broadcast_fallback = [ALL_ROOM.to_string()];
            &broadcast_fallback
        } else {
            rooms
        };

        let members = self.registry.members_of(target_rooms);
        if members.is_empty() {
            tracing::debug!(
                rooms = ?target_rooms,
                title = %payload.title,
                "No live subscriber in target rooms"
            );
            return 0;
        }

        let message = BusMessage::notification(payload);
        let mut delivered = 0;
        for connection in members {
            match connection.send(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // 单个订阅者推送失败只记录, 不影响其它订阅者
                    tracing::warn!(
                        user = %connection.user_id,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            }
        }

        tracing::debug!(
            delivered,
            rooms = ?target_rooms,
            title = %payload.title,
            "Notification fanned out"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::registry::ClientConnection;
    use crate::realtime::transport::{MemoryTransport, Transport};
    use chrono::Utc;
    use shared::message::EventType;
    use shared::{AlertKind, Role};
    use std::time::Duration;

    fn payload(title: &str) -> NotificationPayload {
        NotificationPayload {
            title: title.into(),
            message: "m".into(),
            kind: AlertKind::Low,
            icon: AlertKind::Low.icon().into(),
            status: None,
            created_at: Utc::now(),
        }
    }

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(Duration::from_secs(1800)))
    }

    #[tokio::test]
    async fn delivers_only_to_intersecting_rooms() {
        let registry = registry();
        let (server1, client1) = MemoryTransport::pair();
        let (server2, client2) = MemoryTransport::pair();
        registry.register(Arc::new(ClientConnection::new(
            "agent1".into(),
            Role::Agent,
            vec!["hc_fann".into()],
            server1,
        )));
        registry.register(Arc::new(ClientConnection::new(
            "chief".into(),
            Role::Regional,
            vec![],
            server2,
        )));

        let fanout = NotificationFanout::new(registry);
        let delivered = fanout
            .deliver(&["hc_fann".to_string()], &payload("Low stock: PENTA (batch B100)"))
            .await;
        assert_eq!(delivered, 1);

        let received = client1.read_message().await.unwrap();
        assert_eq!(received.event_type, EventType::NewNotification);
        let body: NotificationPayload = received.decode().unwrap();
        assert_eq!(body.title, "Low stock: PENTA (batch B100)");

        // Regional 用户不在目标房间, 不应收到
        let nothing =
            tokio::time::timeout(Duration::from_millis(50), client2.read_message()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn parent_child_room_targets_a_single_family() {
        let registry = registry();
        let (family_server, family_client) = MemoryTransport::pair();
        let (other_server, other_client) = MemoryTransport::pair();
        let family_room = shared::roles::parent_child_room("+221 77 123 45 67", "chd42");

        registry.register(Arc::new(ClientConnection::new(
            "parent-1".into(),
            Role::Agent,
            vec![family_room.clone()],
            family_server,
        )));
        registry.register(Arc::new(ClientConnection::new(
            "parent-2".into(),
            Role::Agent,
            vec![shared::roles::parent_child_room("770000000", "chd7")],
            other_server,
        )));

        let fanout = NotificationFanout::new(registry);
        let delivered = fanout.deliver(&[family_room], &payload("appointment reminder")).await;
        assert_eq!(delivered, 1);
        assert!(family_client.read_message().await.is_ok());

        let nothing =
            tokio::time::timeout(Duration::from_millis(50), other_client.read_message()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn empty_target_falls_back_to_broadcast() {
        let registry = registry();
        let (server, client) = MemoryTransport::pair();
        registry.register(Arc::new(ClientConnection::new(
            "u1".into(),
            Role::National,
            vec![],
            server,
        )));

        let fanout = NotificationFanout::new(registry);
        let delivered = fanout.deliver(&[], &payload("orphan alert")).await;
        assert_eq!(delivered, 1);
        assert!(client.read_message().await.is_ok());
    }

    #[tokio::test]
    async fn one_dead_subscriber_does_not_block_the_rest() {
        let registry = registry();
        let (dead_server, dead_client) = MemoryTransport::pair();
        dead_client.close().await.unwrap();
        let (live_server, live_client) = MemoryTransport::pair();

        registry.register(Arc::new(ClientConnection::new(
            "dead".into(),
            Role::Agent,
            vec![],
            dead_server,
        )));
        registry.register(Arc::new(ClientConnection::new(
            "live".into(),
            Role::Agent,
            vec![],
            live_server,
        )));

        let fanout = NotificationFanout::new(registry);
        let delivered = fanout
            .deliver(&["agent".to_string()], &payload("still flows"))
            .await;
        assert_eq!(delivered, 1);
        assert!(live_client.read_message().await.is_ok());
    }
}
