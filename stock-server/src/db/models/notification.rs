//! Notification Model
//!
//! 追加写入的通知存档: 既是可供前端拉取的持久记录, 也是
//! 告警去重查询的锚点 (kind + title + created_at)。

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use shared::{AlertKind, Role};

/// One persisted alert/notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Dedup anchor - embeds vaccine and, where relevant, batch number
    pub title: String,
    pub message: String,
    pub kind: AlertKind,
    /// Roles the alert was addressed to (for later pull-style reads)
    pub target_roles: Vec<Role>,
    /// Unix millis
    pub created_at: i64,
}
