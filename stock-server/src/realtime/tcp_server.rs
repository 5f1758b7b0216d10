//! 实时通道 TCP 服务器
//!
//! 负责接受客户端连接并驱动会话协议:
//!
//! 1. 客户端必须在超时内发送 `RegisterUser` 握手
//! 2. 注册进 [`ConnectionRegistry`] (同用户旧连接被逐出)
//! 3. 服务循环: `Join` 追加房间, `Ping` 保活, 任何入向消息刷新活跃时间
//! 4. 断开或出错时注销 (仅当注册项仍属于本连接)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use shared::message::{AckPayload, BusMessage, EventType, JoinPayload, RegisterPayload};

use crate::realtime::registry::{ClientConnection, ConnectionRegistry};
use crate::realtime::transport::{TcpTransport, Transport};
use crate::utils::AppError;

/// 握手必须在该时限内完成
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept loop; runs until the shutdown token fires
pub async fn run_listener(
    registry: Arc<ConnectionRegistry>,
    port: u16,
    shutdown: CancellationToken,
) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Realtime channel failed to bind");
            return;
        }
    };
    tracing::info!("Realtime channel listening on {}", addr);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Realtime channel shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Client connected");
                        spawn_client_handler(registry.clone(), stream, peer, shutdown.clone());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }
}

fn spawn_client_handler(
    registry: Arc<ConnectionRegistry>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream, peer));
        if let Err(e) = drive_connection(registry, transport, shutdown).await {
            tracing::debug!(peer = %peer, error = %e, "Client handler finished");
        }
    });
}

/// Handshake + serve loop for one connection, transport-agnostic so the
/// in-memory transport drives the same protocol in tests.
pub async fn drive_connection(
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    // ========== 握手 ==========
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, transport.read_message())
        .await
        .map_err(|_| {
            AppError::validation("Handshake timeout: no RegisterUser within the time limit")
        })??;

    if first.event_type != EventType::RegisterUser {
        let _ = transport
            .write_message(&BusMessage::ack(&AckPayload::error(
                "Expected RegisterUser handshake",
            )))
            .await;
        let _ = transport.close().await;
        return Err(AppError::validation(format!(
            "Unexpected first event: {}",
            first.event_type
        )));
    }

    let register: RegisterPayload = match first.decode() {
        Ok(payload) => payload,
        Err(e) => {
            let _ = transport
                .write_message(&BusMessage::ack(&AckPayload::error("Malformed handshake")))
                .await;
            let _ = transport.close().await;
            return Err(AppError::validation(format!("Malformed handshake: {}", e)));
        }
    };

    let connection = Arc::new(ClientConnection::new(
        register.user_id.clone(),
        register.role,
        register.rooms,
        transport.clone(),
    ));
    let connection_id = connection.connection_id;
    let user_id = connection.user_id.clone();

    if let Some(evicted) = registry.register(connection.clone()) {
        evicted.close().await;
    }
    transport
        .write_message(&BusMessage::ack(&AckPayload::ok()))
        .await?;
    tracing::info!(user = %user_id, role = %register.role, "Client registered");

    // ========== 服务循环 ==========
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = transport.close().await;
                break;
            }
            incoming = transport.read_message() => {
                match incoming {
                    Ok(message) => {
                        connection.touch();
                        handle_client_message(&registry, &connection, &transport, message).await;
                    }
                    Err(AppError::ClientDisconnected) => {
                        tracing::debug!(user = %user_id, "Client disconnected");
                        registry.remove_if_current(&user_id, connection_id);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(user = %user_id, error = %e, "Read error, dropping connection");
                        registry.remove_if_current(&user_id, connection_id);
                        let _ = transport.close().await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_client_message(
    registry: &ConnectionRegistry,
    connection: &ClientConnection,
    transport: &Arc<dyn Transport>,
    message: BusMessage,
) {
    match message.event_type {
        EventType::Join => match message.decode::<JoinPayload>() {
            Ok(join) => {
                registry.join(&connection.user_id, join.rooms);
                let _ = transport
                    .write_message(&BusMessage::ack(&AckPayload::ok()))
                    .await;
            }
            Err(e) => {
                let _ = transport
                    .write_message(&BusMessage::ack(&AckPayload::error(format!(
                        "Malformed join: {}",
                        e
                    ))))
                    .await;
            }
        },
        EventType::Ping => {
            let _ = transport.write_message(&BusMessage::pong()).await;
        }
        EventType::RegisterUser => {
            let _ = transport
                .write_message(&BusMessage::ack(&AckPayload::error("Already registered")))
                .await;
        }
        // 服务端专属事件或无需响应的事件, 忽略
        EventType::NewNotification | EventType::Ack | EventType::Pong => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::MemoryTransport;
    use shared::Role;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(Duration::from_secs(1800)))
    }

    async fn register_client(
        registry: Arc<ConnectionRegistry>,
        user: &str,
        rooms: Vec<String>,
        shutdown: CancellationToken,
    ) -> Arc<MemoryTransport> {
        let (server_side, client_side) = MemoryTransport::pair();
        let server_transport: Arc<dyn Transport> = server_side;
        tokio::spawn(drive_connection(registry, server_transport, shutdown));

        client_side
            .write_message(&BusMessage::register_user(&RegisterPayload {
                user_id: user.into(),
                role: Role::Agent,
                rooms,
            }))
            .await
            .unwrap();
        let ack = client_side.read_message().await.unwrap();
        assert_eq!(ack.event_type, EventType::Ack);
        assert!(ack.decode::<AckPayload>().unwrap().ok);
        client_side
    }

    #[tokio::test]
    async fn handshake_registers_and_join_adds_rooms() {
        let registry = registry();
        let shutdown = CancellationToken::new();
        let client =
            register_client(registry.clone(), "u1", vec!["hc_fann".into()], shutdown.clone())
                .await;
        assert_eq!(registry.len(), 1);

        client
            .write_message(&BusMessage::join(&JoinPayload {
                rooms: vec!["region_dakar".into()],
            }))
            .await
            .unwrap();
        let ack = client.read_message().await.unwrap();
        assert!(ack.decode::<AckPayload>().unwrap().ok);

        let members = registry.members_of(&["region_dakar".to_string()]);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "u1");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn first_message_must_be_register() {
        let registry = registry();
        let (server_side, client_side) = MemoryTransport::pair();
        let server_transport: Arc<dyn Transport> = server_side;
        let handle = tokio::spawn(drive_connection(
            registry.clone(),
            server_transport,
            CancellationToken::new(),
        ));

        client_side.write_message(&BusMessage::ping()).await.unwrap();
        let ack = client_side.read_message().await.unwrap();
        assert!(!ack.decode::<AckPayload>().unwrap().ok);
        assert!(handle.await.unwrap().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn ping_gets_pong_and_refreshes_activity() {
        let registry = registry();
        let shutdown = CancellationToken::new();
        let client = register_client(registry.clone(), "u1", vec![], shutdown.clone()).await;

        client.write_message(&BusMessage::ping()).await.unwrap();
        let pong = client.read_message().await.unwrap();
        assert_eq!(pong.event_type, EventType::Pong);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn disconnect_unregisters_the_connection() {
        let registry = registry();
        let shutdown = CancellationToken::new();
        let client = register_client(registry.clone(), "u1", vec![], shutdown.clone()).await;
        assert_eq!(registry.len(), 1);

        client.close().await.unwrap();
        // 等 handler 观察到断开
        for _ in 0..50 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
    }
}
