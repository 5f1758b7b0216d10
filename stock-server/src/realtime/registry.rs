//! Connection Registry
//!
//! 显式的连接注册表对象, 注入分发组件; 不是进程级单例。
//!
//! 同一用户同时只保留一条活动连接 (last-connection-wins): 新连接注册时
//! 旧连接被逐出并关闭。离线超过空闲阈值的连接由后台清扫任务逐出。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::Role;
use shared::message::BusMessage;
use shared::roles::{ALL_ROOM, user_room};

use crate::realtime::transport::Transport;
use crate::utils::AppError;
use crate::utils::time::now_millis;

/// One live registered connection
#[derive(Debug)]
pub struct ClientConnection {
    pub connection_id: Uuid,
    pub user_id: String,
    pub role: Role,
    rooms: std::sync::RwLock<HashSet<String>>,
    transport: Arc<dyn Transport>,
    last_active: AtomicI64,
}

impl ClientConnection {
    /// New connection, auto-joined to its role room, its private user
    /// room and the catch-all `all` room.
    pub fn new(
        user_id: String,
        role: Role,
        extra_rooms: Vec<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut rooms: HashSet<String> = extra_rooms.into_iter().collect();
        rooms.insert(role.room());
        rooms.insert(user_room(&user_id));
        rooms.insert(ALL_ROOM.to_string());

        Self {
            connection_id: Uuid::new_v4(),
            user_id,
            role,
            rooms: std::sync::RwLock::new(rooms),
            transport,
            last_active: AtomicI64::new(now_millis()),
        }
    }

    pub fn join(&self, rooms: impl IntoIterator<Item = String>) {
        let mut joined = self.rooms.write().expect("rooms lock poisoned");
        joined.extend(rooms);
    }

    pub fn rooms(&self) -> HashSet<String> {
        self.rooms.read().expect("rooms lock poisoned").clone()
    }

    pub fn in_any_room(&self, rooms: &[String]) -> bool {
        let joined = self.rooms.read().expect("rooms lock poisoned");
        rooms.iter().any(|room| joined.contains(room))
    }

    /// 任何入向消息都刷新活跃时间
    pub fn touch(&self) {
        self.last_active.store(now_millis(), Ordering::Relaxed);
    }

    pub fn idle_millis(&self, now: i64) -> i64 {
        now - self.last_active.load(Ordering::Relaxed)
    }

    pub async fn send(&self, msg: &BusMessage) -> Result<(), AppError> {
        self.transport.write_message(msg).await
    }

    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(user = %self.user_id, error = %e, "Transport close failed");
        }
    }
}

/// Registry of live connections, keyed by user id
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ClientConnection>>,
    idle_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            idle_timeout,
        }
    }

    /// Register a connection; any prior registration for the same user is
    /// evicted and returned so the caller can close it.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let user_id = connection.user_id.clone();
        let evicted = self.connections.insert(user_id.clone(), connection);
        if evicted.is_some() {
            tracing::info!(user = %user_id, "Evicting prior connection (last-connection-wins)");
        }
        evicted
    }

    /// Add rooms to a registered user's connection
    pub fn join(&self, user_id: &str, rooms: Vec<String>) -> bool {
        match self.connections.get(user_id) {
            Some(connection) => {
                connection.join(rooms);
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, user_id: &str) {
        if let Some(connection) = self.connections.get(user_id) {
            connection.touch();
        }
    }

    /// Remove the user's registration only if it still is this connection
    /// - a stale handler must not tear down a newer registration.
    pub fn remove_if_current(&self, user_id: &str, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(user_id, |_, current| current.connection_id == connection_id)
            .is_some()
    }

    /// Connections subscribed to at least one of `rooms`
    ///
    /// One connection per user, so per-call delivery is at-most-once per
    /// connected user by construction.
    pub fn members_of(&self, rooms: &[String]) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().in_any_room(rooms))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Evict connections idle for longer than the timeout; returns them
    /// for the caller to close.
    pub fn sweep_idle(&self) -> Vec<Arc<ClientConnection>> {
        let now = now_millis();
        let timeout_millis = self.idle_timeout.as_millis() as i64;

        let stale: Vec<(String, Uuid)> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_millis(now) > timeout_millis)
            .map(|entry| (entry.key().clone(), entry.value().connection_id))
            .collect();

        let mut evicted = Vec::new();
        for (user_id, connection_id) in stale {
            if let Some((_, connection)) = self
                .connections
                .remove_if(&user_id, |_, current| current.connection_id == connection_id)
            {
                tracing::info!(user = %user_id, "Evicting idle connection");
                evicted.push(connection);
            }
        }
        evicted
    }
}

/// Periodic sweep of idle connections
pub async fn run_sweeper(
    registry: Arc<ConnectionRegistry>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // 跳过启动时的立即 tick, 刚注册的连接不需要清扫
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Connection sweeper stopped");
                break;
            }
            _ = interval.tick() => {
                let evicted = registry.sweep_idle();
                for connection in evicted {
                    connection.close().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::MemoryTransport;

    fn connection(user: &str, role: Role, rooms: Vec<String>) -> Arc<ClientConnection> {
        let (server_side, _client_side) = MemoryTransport::pair();
        Arc::new(ClientConnection::new(
            user.to_string(),
            role,
            rooms,
            server_side,
        ))
    }

    #[tokio::test]
    async fn registration_joins_default_rooms() {
        let conn = connection("u1", Role::Agent, vec!["hc_fann".into()]);
        let rooms = conn.rooms();
        assert!(rooms.contains("agent"));
        assert!(rooms.contains("user_u1"));
        assert!(rooms.contains(ALL_ROOM));
        assert!(rooms.contains("hc_fann"));
    }

    #[tokio::test]
    async fn last_connection_wins() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1800));
        let first = connection("u1", Role::Agent, vec![]);
        let second = connection("u1", Role::Agent, vec![]);
        let second_id = second.connection_id;

        assert!(registry.register(first.clone()).is_none());
        let evicted = registry.register(second).expect("first should be evicted");
        assert_eq!(evicted.connection_id, first.connection_id);
        assert_eq!(registry.len(), 1);

        // 旧连接的 handler 退出时不能拆掉新注册
        assert!(!registry.remove_if_current("u1", first.connection_id));
        assert!(registry.remove_if_current("u1", second_id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn members_resolve_by_room_intersection() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1800));
        registry.register(connection("agent1", Role::Agent, vec!["hc_fann".into()]));
        registry.register(connection("agent2", Role::Agent, vec!["hc_pikine".into()]));
        registry.register(connection("chief", Role::Regional, vec!["region_dakar".into()]));

        let fann = registry.members_of(&["hc_fann".to_string()]);
        assert_eq!(fann.len(), 1);
        assert_eq!(fann[0].user_id, "agent1");

        let agents = registry.members_of(&["agent".to_string()]);
        assert_eq!(agents.len(), 2);

        let everyone = registry.members_of(&[ALL_ROOM.to_string()]);
        assert_eq!(everyone.len(), 3);
    }

    #[tokio::test]
    async fn idle_connections_are_swept() {
        let registry = ConnectionRegistry::new(Duration::from_millis(0));
        let conn = connection("u1", Role::Agent, vec![]);
        registry.register(conn.clone());

        // idle_timeout 为零, 任何连接都立即过期
        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = registry.sweep_idle();
        assert_eq!(evicted.len(), 1);
        assert!(registry.is_empty());

        // touch 之后的连接不会被清扫
        let registry = ConnectionRegistry::new(Duration::from_secs(1800));
        let conn = connection("u2", Role::Agent, vec![]);
        registry.register(conn.clone());
        conn.touch();
        assert!(registry.sweep_idle().is_empty());
        assert_eq!(registry.len(), 1);
    }
}
