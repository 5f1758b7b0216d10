//! 告警子系统
//!
//! - [`classifier`] - 批次状况分级 (低库存/临期/过期, 互斥)
//! - [`AlertDeduplicator`] - 24h 滚动窗口去重
//! - [`AlertService`] - 去重 → 存档 → 实时分发的唯一通道
//! - [`scheduler`] - 每日全量扫描

pub mod classifier;
pub mod dedup;
pub mod scheduler;
pub mod service;

pub use classifier::{LotCondition, Thresholds, classify};
pub use dedup::AlertDeduplicator;
pub use scheduler::{ScanSummary, scan_once};
pub use service::AlertService;
