//! Alert Service
//!
//! The one path every alert takes: dedup check → persist → realtime
//! fanout. Delivery problems are logged and swallowed; a notification
//! must never fail or roll back a stock mutation.
//!
//! 标题是去重锚点, 固定嵌入疫苗名和批号, 每种 kind 一种格式。

use chrono::NaiveDate;

use shared::roles::{health_center_room, region_room, user_room};
use shared::{AlertKind, NotificationPayload, Role, StockLevel};

use crate::alerting::classifier::{LotCondition, Thresholds, classify};
use crate::alerting::dedup::AlertDeduplicator;
use crate::db::models::{Notification, StockLot, TransferRecord, TransferStatus};
use crate::db::repository::NotificationRepository;
use crate::db::with_retry;
use crate::inventory::LotChange;
use crate::realtime::NotificationFanout;
use crate::utils::time::{days_until, millis_to_datetime, now_millis};

#[derive(Clone)]
pub struct AlertService {
    thresholds: Thresholds,
    notifications: NotificationRepository,
    dedup: AlertDeduplicator,
    fanout: NotificationFanout,
}

impl AlertService {
    pub fn new(
        thresholds: Thresholds,
        notifications: NotificationRepository,
        dedup: AlertDeduplicator,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            thresholds,
            notifications,
            dedup,
            fanout,
        }
    }

    /// Threshold re-evaluation after any quantity mutation
    ///
    /// 低于阈值 → low (受去重约束); 从阈值之下回到阈值之上 → restored
    /// (需要比较变更前后的数量, 只看结果值是判不出穿越的)。
    pub async fn lot_quantity_changed(&self, change: &LotChange) {
        let lot = &change.lot;
        let threshold = self.thresholds.low_stock;

        if lot.quantity < threshold {
            self.emit_low(lot).await;
        } else if change.previous_quantity < threshold && lot.quantity >= threshold {
            let title = format!(
                "Stock restored: {} (batch {})",
                lot.vaccine, lot.batch_number
            );
            let message = format!(
                "{} (batch {}) is back to {} doses at {}",
                lot.vaccine,
                lot.batch_number,
                lot.quantity,
                place_of(lot)
            );
            self.emit(
                AlertKind::Restored,
                title,
                message,
                lot_rooms(lot, AlertKind::Restored),
            )
            .await;
        }
    }

    /// First receipt of a new lot
    ///
    /// 只做低库存检查: 新建批次没有"之前"的状态, 不存在 restored 穿越。
    pub async fn lot_created(&self, change: &LotChange) {
        let lot = &change.lot;
        let title = format!("Stock received: {} (batch {})", lot.vaccine, lot.batch_number);
        let message = format!(
            "{} doses of {} (batch {}) received at {}",
            lot.quantity,
            lot.vaccine,
            lot.batch_number,
            place_of(lot)
        );
        self.emit(
            AlertKind::Created,
            title,
            message,
            lot_rooms(lot, AlertKind::Created),
        )
        .await;

        if lot.quantity < self.thresholds.low_stock {
            self.emit_low(lot).await;
        }
    }

    /// Manual field edit
    pub async fn lot_updated(&self, change: &LotChange) {
        let lot = &change.lot;
        let title = format!("Stock updated: {} (batch {})", lot.vaccine, lot.batch_number);
        let message = format!(
            "{} (batch {}) now holds {} doses at {}",
            lot.vaccine,
            lot.batch_number,
            lot.quantity,
            place_of(lot)
        );
        self.emit(
            AlertKind::Updated,
            title,
            message,
            lot_rooms(lot, AlertKind::Updated),
        )
        .await;

        self.lot_quantity_changed(change).await;
    }

    /// Daily scan entry point; returns the classification for summaries
    pub async fn scan_lot(&self, lot: &StockLot, today: NaiveDate) -> Option<LotCondition> {
        let condition = classify(lot, today, &self.thresholds)?;
        match condition {
            LotCondition::Low => self.emit_low(lot).await,
            LotCondition::Expired => {
                let title = format!("Expired: {} (batch {})", lot.vaccine, lot.batch_number);
                let message = format!(
                    "Batch {} of {} at {} expired on {}",
                    lot.batch_number,
                    lot.vaccine,
                    place_of(lot),
                    lot.expiration_date
                );
                self.emit(
                    AlertKind::Expired,
                    title,
                    message,
                    lot_rooms(lot, AlertKind::Expired),
                )
                .await;
            }
            LotCondition::Expiring => {
                let title =
                    format!("Expiring soon: {} (batch {})", lot.vaccine, lot.batch_number);
                let message = format!(
                    "Batch {} of {} at {} expires on {} ({} days left)",
                    lot.batch_number,
                    lot.vaccine,
                    place_of(lot),
                    lot.expiration_date,
                    days_until(today, lot.expiration_date)
                );
                self.emit(
                    AlertKind::Expiring,
                    title,
                    message,
                    lot_rooms(lot, AlertKind::Expiring),
                )
                .await;
            }
        }
        Some(condition)
    }

    /// Notify the resolved recipient of a new pending transfer
    pub async fn transfer_initiated(&self, record: &TransferRecord) {
        let title = format!(
            "Incoming transfer: {} (batch {})",
            record.vaccine, record.batch_number
        );
        let message = format!(
            "{} doses of {} (batch {}) sent by {} are awaiting your response",
            record.quantity, record.vaccine, record.batch_number, record.from_user
        );
        self.emit(
            AlertKind::Transferred,
            title,
            message,
            recipient_rooms(record),
        )
        .await;
    }

    /// Notify the recipient of a direct (auto-accepted) move: the stock
    /// already arrived, there is nothing to respond to.
    pub async fn transfer_delivered(&self, record: &TransferRecord) {
        let title = format!(
            "Stock transferred: {} (batch {})",
            record.vaccine, record.batch_number
        );
        let message = format!(
            "{} doses of {} (batch {}) sent by {} were added to your stock",
            record.quantity, record.vaccine, record.batch_number, record.from_user
        );
        self.emit(
            AlertKind::Transferred,
            title,
            message,
            recipient_rooms(record),
        )
        .await;
    }

    /// Notify the other party after a transfer reaches a terminal state
    pub async fn transfer_resolved(&self, record: &TransferRecord) {
        let (title, message, rooms) = match record.status {
            TransferStatus::Accepted => (
                format!(
                    "Transfer accepted: {} (batch {})",
                    record.vaccine, record.batch_number
                ),
                format!(
                    "Your transfer of {} doses of {} (batch {}) was accepted",
                    record.quantity, record.vaccine, record.batch_number
                ),
                originator_rooms(record),
            ),
            TransferStatus::Rejected => (
                format!(
                    "Transfer rejected: {} (batch {})",
                    record.vaccine, record.batch_number
                ),
                format!(
                    "Your transfer of {} doses of {} (batch {}) was rejected{}",
                    record.quantity,
                    record.vaccine,
                    record.batch_number,
                    record
                        .notes
                        .as_deref()
                        .map(|reason| format!(": {}", reason))
                        .unwrap_or_default()
                ),
                originator_rooms(record),
            ),
            TransferStatus::Cancelled => (
                format!(
                    "Transfer cancelled: {} (batch {})",
                    record.vaccine, record.batch_number
                ),
                format!(
                    "{} cancelled the transfer of {} doses of {} (batch {})",
                    record.from_user, record.quantity, record.vaccine, record.batch_number
                ),
                recipient_rooms(record),
            ),
            TransferStatus::Pending => return,
        };
        self.emit(AlertKind::Transferred, title, message, rooms).await;
    }

    async fn emit_low(&self, lot: &StockLot) {
        let title = format!("Low stock: {} (batch {})", lot.vaccine, lot.batch_number);
        let message = format!(
            "{} doses of {} (batch {}) left at {} - threshold is {}",
            lot.quantity,
            lot.vaccine,
            lot.batch_number,
            place_of(lot),
            self.thresholds.low_stock
        );
        self.emit(AlertKind::Low, title, message, lot_rooms(lot, AlertKind::Low))
            .await;
    }

    /// dedup → persist → fanout
    async fn emit(&self, kind: AlertKind, title: String, message: String, target: AlertTarget) {
        if self.dedup.should_suppress(kind, &title).await {
            tracing::debug!(kind = %kind, title = %title, "Alert suppressed inside dedup window");
            return;
        }

        let created_at = now_millis();
        let record = Notification {
            id: None,
            title: title.clone(),
            message: message.clone(),
            kind,
            target_roles: target.roles.clone(),
            created_at,
        };
        if let Err(e) = with_retry("notification.create", || self.notifications.create(record.clone())).await
        {
            // 存档失败不阻断实时推送; 代价是去重窗口看不到这一条
            tracing::error!(error = %e, title = %title, "Failed to persist notification");
        }

        let payload = NotificationPayload {
            title,
            message,
            kind,
            icon: kind.icon().to_string(),
            status: Some("unread".to_string()),
            created_at: millis_to_datetime(created_at),
        };
        self.fanout.deliver(&target.rooms, &payload).await;
    }
}

/// Resolved delivery target: live rooms plus the roles persisted on the
/// notification record for later pull-style reads.
struct AlertTarget {
    rooms: Vec<String>,
    roles: Vec<Role>,
}

/// Room/role targeting for lot condition alerts
///
/// 批次在哪一层, 告警就落到哪一层的房间; 过期告警额外抄送 national。
fn lot_rooms(lot: &StockLot, kind: AlertKind) -> AlertTarget {
    let level = lot.level.unwrap_or(StockLevel::National);
    let mut rooms = Vec::new();
    let mut roles = Vec::new();

    match level {
        StockLevel::National => {
            rooms.push(Role::National.room());
            roles.push(Role::National);
        }
        StockLevel::Regional => {
            rooms.push(Role::Regional.room());
            roles.push(Role::Regional);
            if let Some(region) = &lot.region {
                rooms.push(region_room(region));
            }
        }
        StockLevel::District | StockLevel::Agent => {
            rooms.push(Role::District.room());
            rooms.push(Role::Agent.room());
            roles.push(Role::District);
            roles.push(Role::Agent);
            if let Some(hc) = &lot.health_center {
                rooms.push(health_center_room(hc));
            }
            if let Some(region) = &lot.region {
                rooms.push(Role::Regional.room());
                rooms.push(region_room(region));
                roles.push(Role::Regional);
            }
        }
    }

    // Expired stock is a program-level problem wherever it sits
    if kind == AlertKind::Expired && !roles.contains(&Role::National) {
        rooms.push(Role::National.room());
        roles.push(Role::National);
    }

    AlertTarget { rooms, roles }
}

/// Rooms of the transfer recipient: the named user when one exists,
/// else the role+location rooms of the destination.
fn recipient_rooms(record: &TransferRecord) -> AlertTarget {
    let to_role = Role::from(record.to_level);
    if let Some(to_user) = &record.to_user {
        return AlertTarget {
            rooms: vec![user_room(to_user)],
            roles: vec![to_role],
        };
    }

    let mut rooms = vec![to_role.room()];
    match record.to_level {
        StockLevel::Regional => {
            if let Some(region) = &record.to_region {
                rooms.push(region_room(region));
            }
        }
        StockLevel::District | StockLevel::Agent => {
            if let Some(hc) = &record.to_health_center {
                rooms.push(health_center_room(hc));
            }
        }
        StockLevel::National => {}
    }
    AlertTarget {
        rooms,
        roles: vec![to_role],
    }
}

fn originator_rooms(record: &TransferRecord) -> AlertTarget {
    AlertTarget {
        rooms: vec![user_room(&record.from_user)],
        roles: vec![Role::from(record.from_level)],
    }
}

/// Human-readable location of a lot
fn place_of(lot: &StockLot) -> String {
    if let Some(hc) = &lot.health_center {
        return hc.clone();
    }
    if let Some(region) = &lot.region {
        return format!("region {}", region);
    }
    "the national store".to_string()
}
