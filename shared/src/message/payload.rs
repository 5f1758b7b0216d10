use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::roles::Role;

// ==================== Alert Kind ====================

/// Kind of a stock alert/notification
///
/// 噪声类 (`Low`/`Expiring`/`Expired`) 受 24h 去重窗口约束;
/// 事务类 (`Restored`/`Created`/`Updated`/`Transferred`) 每次都发.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Quantity below the low-stock threshold
    Low,
    /// Expiration date inside the warning window
    Expiring,
    /// Expiration date passed
    Expired,
    /// Quantity recovered to at or above the threshold
    Restored,
    /// New lot received
    Created,
    /// Lot fields edited
    Updated,
    /// Transfer lifecycle event
    Transferred,
}

impl AlertKind {
    /// Standing conditions are suppressed inside the dedup window;
    /// transactional kinds represent a distinct event and always fire.
    pub fn is_suppressible(&self) -> bool {
        matches!(self, AlertKind::Low | AlertKind::Expiring | AlertKind::Expired)
    }

    /// Icon hint for dashboard rendering
    pub fn icon(&self) -> &'static str {
        match self {
            AlertKind::Low => "inventory_low",
            AlertKind::Expiring => "hourglass",
            AlertKind::Expired => "block",
            AlertKind::Restored => "check_circle",
            AlertKind::Created => "add_box",
            AlertKind::Updated => "edit",
            AlertKind::Transferred => "swap_horiz",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Low => write!(f, "low"),
            AlertKind::Expiring => write!(f, "expiring"),
            AlertKind::Expired => write!(f, "expired"),
            AlertKind::Restored => write!(f, "restored"),
            AlertKind::Created => write!(f, "created"),
            AlertKind::Updated => write!(f, "updated"),
            AlertKind::Transferred => write!(f, "transferred"),
        }
    }
}

// ==================== Payloads ====================

/// 握手载荷 (客户端 -> 服务端)
///
/// Registers the connection under `user_id`. The server joins the
/// connection to its role room, its private `user_<id>` room and the
/// catch-all `all` room; `rooms` lists extra subscriptions (for example
/// the caller's `region_<slug>` or `hc_<slug>` room).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub rooms: Vec<String>,
}

/// 追加订阅载荷 (客户端 -> 服务端)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub rooms: Vec<String>,
}

/// 服务端确认载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckPayload {
    pub fn ok() -> Self {
        Self { ok: true, message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// 通知载荷 (服务端 -> 客户端)
///
/// Field names follow the dashboard wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}
