//! Alert Deduplicator
//!
//! "每种状况每个主题每天最多播一次" - 以 (kind, title) 为键查询滚动
//! 窗口内是否已有记录。窗口是滑动的: 条件在窗口过期后再次触发会重新
//! 播报, 这是有意为之而非严格 exactly-once。

use shared::AlertKind;

use crate::db::repository::NotificationRepository;
use crate::db::with_retry;
use crate::utils::time::now_millis;

#[derive(Clone)]
pub struct AlertDeduplicator {
    notifications: NotificationRepository,
    window_hours: i64,
}

impl AlertDeduplicator {
    pub fn new(notifications: NotificationRepository, window_hours: i64) -> Self {
        Self {
            notifications,
            window_hours,
        }
    }

    /// Whether an alert of this kind/title should be suppressed
    ///
    /// Only the noisy standing-condition kinds are ever suppressed;
    /// transactional kinds always pass. A failed window lookup lets the
    /// alert through - alerting twice beats alerting never.
    pub async fn should_suppress(&self, kind: AlertKind, title: &str) -> bool {
        if !kind.is_suppressible() {
            return false;
        }

        let cutoff = now_millis() - self.window_hours * 3_600_000;
        match with_retry("notification.count_since", || {
            self.notifications.count_since(kind, title, cutoff)
        })
        .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = %kind,
                    title = %title,
                    "Dedup window lookup failed, letting alert through"
                );
                false
            }
        }
    }
}
