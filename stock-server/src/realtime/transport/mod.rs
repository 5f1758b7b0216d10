//! Transport 传输层抽象
//!
//! 可插拔的传输层:
//! ```text
//!         ┌────────────────────┐
//!         │   Transport Trait  │
//!         └────────┬───────────┘
//!                  │
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!   TcpTransport     MemoryTransport
//!   (TCP 协议)       (同进程/测试)
//! ```
//!
//! Wire framing:
//! `[1 byte event type][16 bytes request id][4 bytes BE payload len][payload]`

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use shared::message::{BusMessage, EventType};

use crate::utils::AppError;

/// 单帧载荷上限, 防御畸形长度前缀
const MAX_PAYLOAD_BYTES: u32 = 1024 * 1024;

/// Transport 传输层特征
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// 从传输层读取一条消息
    async fn read_message(&self) -> Result<BusMessage, AppError>;

    /// 向传输层写入一条消息
    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError>;

    /// 关闭传输连接
    async fn close(&self) -> Result<(), AppError>;

    /// 获取对端地址
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

// ========== 辅助函数 ==========

/// 从异步流中读取一条 BusMessage
pub(crate) async fn read_from_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<BusMessage, AppError> {
    // 事件类型 (1 字节)
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::ClientDisconnected);
        }
        Err(e) => {
            return Err(AppError::internal(format!("Read event type failed: {}", e)));
        }
    }
    let event_type = EventType::try_from(type_buf[0])
        .map_err(|_| AppError::validation(format!("Invalid event type: {}", type_buf[0])))?;

    // 请求 ID (16 字节)
    let mut id_buf = [0u8; 16];
    reader
        .read_exact(&mut id_buf)
        .await
        .map_err(read_err_to_app)?;
    let request_id = Uuid::from_bytes(id_buf);

    // 载荷长度 (4 字节 BE)
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(read_err_to_app)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_PAYLOAD_BYTES {
        return Err(AppError::validation(format!(
            "Payload of {} bytes exceeds the {} byte limit",
            len, MAX_PAYLOAD_BYTES
        )));
    }

    // 载荷
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(read_err_to_app)?;

    Ok(BusMessage {
        request_id,
        event_type,
        payload,
    })
}

/// 向异步流写入一条 BusMessage
pub(crate) async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), AppError> {
    if msg.payload.len() as u64 > MAX_PAYLOAD_BYTES as u64 {
        return Err(AppError::validation("Payload exceeds frame limit"));
    }

    let mut frame = Vec::with_capacity(1 + 16 + 4 + msg.payload.len());
    frame.push(msg.event_type as u8);
    frame.extend_from_slice(msg.request_id.as_bytes());
    frame.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&msg.payload);

    writer.write_all(&frame).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            AppError::ClientDisconnected
        } else {
            AppError::internal(format!("Write failed: {}", e))
        }
    })?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::internal(format!("Flush failed: {}", e)))?;
    Ok(())
}

fn read_err_to_app(e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        AppError::ClientDisconnected
    } else {
        AppError::internal(format!("Read failed: {}", e))
    }
}
