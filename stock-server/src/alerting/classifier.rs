//! Lot condition classification
//!
//! 每次全量扫描对单个批次只归入一种状况 (互斥), 低库存优先于效期:
//! 低库存直接威胁接种计划, 效期问题由下一条规则兜底。

use chrono::NaiveDate;

use crate::core::Config;
use crate::db::models::StockLot;
use crate::utils::time::days_until;

/// Threshold policy consumed by both the synchronous check path and the
/// daily scan - one source, no drift.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// A lot is `low` strictly below this many doses
    pub low_stock: i64,
    /// A lot is `expiring` within this many days of its expiration date
    pub expiring_window_days: i64,
}

impl From<&Config> for Thresholds {
    fn from(config: &Config) -> Self {
        Self {
            low_stock: config.low_stock_threshold,
            expiring_window_days: config.expiring_window_days,
        }
    }
}

/// Mutually exclusive standing conditions, low checked first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotCondition {
    Low,
    Expired,
    Expiring,
}

/// Classify one lot against the thresholds as of `today`
pub fn classify(lot: &StockLot, today: NaiveDate, thresholds: &Thresholds) -> Option<LotCondition> {
    if lot.quantity < thresholds.low_stock {
        return Some(LotCondition::Low);
    }
    let days = days_until(today, lot.expiration_date);
    if days < 0 {
        Some(LotCondition::Expired)
    } else if days <= thresholds.expiring_window_days {
        Some(LotCondition::Expiring)
    } else {
        None
    }
}
