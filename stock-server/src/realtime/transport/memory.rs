//! In-process transport
//!
//! 与 TCP 实现行为一致的同进程通道, 测试和内嵌客户端使用。

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

use shared::message::BusMessage;

use super::Transport;
use crate::utils::AppError;

const CHANNEL_CAPACITY: usize = 256;

/// One end of an in-memory duplex channel
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::Sender<BusMessage>,
    inbound: Mutex<mpsc::Receiver<BusMessage>>,
    closed: AtomicBool,
    label: &'static str,
}

impl MemoryTransport {
    /// Cross-wired pair: what one side writes, the other reads
    pub fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        let (server_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (client_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let server = Arc::new(MemoryTransport {
            outbound: server_tx,
            inbound: Mutex::new(server_rx),
            closed: AtomicBool::new(false),
            label: "server",
        });
        let client = Arc::new(MemoryTransport {
            outbound: client_tx,
            inbound: Mutex::new(client_rx),
            closed: AtomicBool::new(false),
            label: "client",
        });
        (server, client)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_message(&self) -> Result<BusMessage, AppError> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(AppError::ClientDisconnected)
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ClientDisconnected);
        }
        self.outbound
            .send(msg.clone())
            .await
            .map_err(|_| AppError::ClientDisconnected)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::SeqCst);
        // 关闭入向通道, 对端后续写入立即失败
        self.inbound.lock().await.close();
        Ok(())
    }

    fn peer_addr(&self) -> Option<String> {
        Some(format!("memory:{}", self.label))
    }
}
