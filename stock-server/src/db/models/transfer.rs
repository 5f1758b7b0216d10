//! Transfer Record Model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use surrealdb::RecordId;

use shared::StockLevel;

/// Transfer workflow state
///
/// `pending` 是唯一的非终态; 到达终态之后记录不可再变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::Accepted => write!(f, "accepted"),
            TransferStatus::Rejected => write!(f, "rejected"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable audit entry for one quantity movement
///
/// 数量在 initiate 时即从源批次扣除 (预留), 在 accept 时记入目标批次,
/// 在 reject/cancel 时一次性退回源批次。对任何 accepted 记录:
/// 源扣减 == 目标增加 == `quantity`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub vaccine: String,
    pub batch_number: String,
    pub quantity: i64,
    /// Carried so acceptance can create the destination lot
    pub expiration_date: NaiveDate,
    pub from_level: StockLevel,
    pub to_level: StockLevel,
    #[serde(default)]
    pub from_region: Option<String>,
    #[serde(default)]
    pub from_health_center: Option<String>,
    #[serde(default)]
    pub to_region: Option<String>,
    #[serde(default)]
    pub to_health_center: Option<String>,
    pub from_user: String,
    #[serde(default)]
    pub to_user: Option<String>,
    /// Source lot the reservation was debited from
    pub source_lot: RecordId,
    pub status: TransferStatus,
    /// Unix millis
    pub transfer_date: i64,
    #[serde(default)]
    pub accepted_date: Option<i64>,
    #[serde(default)]
    pub rejected_date: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Initiate payload for `POST /api/stocks/transfers/initiate`
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct TransferInitiate {
    /// Source lot id (`stock:<key>`)
    #[validate(length(min = 1))]
    pub stock_id: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub to_region: Option<String>,
    pub to_health_center: Option<String>,
    pub to_user_id: Option<String>,
    /// Trusted direct move: resolve the transfer in the same request
    #[serde(default)]
    pub auto_accept: bool,
    pub notes: Option<String>,
}

/// Respond payload for accept/reject
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferRespond {
    pub reason: Option<String>,
}
