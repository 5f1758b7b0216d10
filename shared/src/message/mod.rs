//! 实时通道消息类型定义
//!
//! These types are shared between the stock server and its clients and
//! travel over both the in-process (memory) and network (TCP) transports.
//!
//! Wire framing (handled by the server transport layer):
//!
//! ```text
//! [1 byte event type][16 bytes request id][4 bytes BE payload len][JSON payload]
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod payload;
pub use payload::*;

/// Realtime channel event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 握手: 客户端注册用户身份和房间
    RegisterUser = 0,
    /// 客户端追加订阅房间
    Join = 1,
    /// 服务端确认
    Ack = 2,
    /// 服务端推送通知
    NewNotification = 3,
    /// 保活
    Ping = 4,
    Pong = 5,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::RegisterUser),
            1 => Ok(EventType::Join),
            2 => Ok(EventType::Ack),
            3 => Ok(EventType::NewNotification),
            4 => Ok(EventType::Ping),
            5 => Ok(EventType::Pong),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::RegisterUser => write!(f, "register_user"),
            EventType::Join => write!(f, "join"),
            EventType::Ack => write!(f, "ack"),
            EventType::NewNotification => write!(f, "new_notification"),
            EventType::Ping => write!(f, "ping"),
            EventType::Pong => write!(f, "pong"),
        }
    }
}

/// One message on the realtime channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    /// JSON-encoded payload, type determined by `event_type`
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Build a message from a serializable payload
    pub fn new<T: Serialize>(event_type: EventType, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            request_id: Uuid::new_v4(),
            event_type,
            payload: serde_json::to_vec(data)?,
        })
    }

    /// Build a payload-less message (Ping/Pong)
    pub fn empty(event_type: EventType) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            payload: Vec::new(),
        }
    }

    /// Decode the payload into its expected type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    // ========== Constructors ==========

    pub fn register_user(data: &RegisterPayload) -> Self {
        Self::new(EventType::RegisterUser, data).expect("RegisterPayload is always serializable")
    }

    pub fn join(data: &JoinPayload) -> Self {
        Self::new(EventType::Join, data).expect("JoinPayload is always serializable")
    }

    pub fn ack(data: &AckPayload) -> Self {
        Self::new(EventType::Ack, data).expect("AckPayload is always serializable")
    }

    pub fn notification(data: &NotificationPayload) -> Self {
        Self::new(EventType::NewNotification, data)
            .expect("NotificationPayload is always serializable")
    }

    pub fn ping() -> Self {
        Self::empty(EventType::Ping)
    }

    pub fn pong() -> Self {
        Self::empty(EventType::Pong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::Role;

    #[test]
    fn event_type_round_trips_through_u8() {
        for raw in 0..=5u8 {
            let et = EventType::try_from(raw).unwrap();
            assert_eq!(et as u8, raw);
        }
        assert!(EventType::try_from(42).is_err());
    }

    #[test]
    fn register_payload_round_trips() {
        let payload = RegisterPayload {
            user_id: "u1".into(),
            role: Role::Agent,
            rooms: vec!["hc_fann".into()],
        };
        let msg = BusMessage::register_user(&payload);
        let back: RegisterPayload = msg.decode().unwrap();
        assert_eq!(back, payload);
    }
}
