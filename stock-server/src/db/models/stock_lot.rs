//! Stock Lot Model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use shared::StockLevel;

/// One physical batch of a vaccine held at one place in the hierarchy
///
/// 身份元组 `(vaccine, batch_number, level, region, health_center,
/// assigned_to)` 全局唯一: 同一身份永远只有一行, 合并而不是新增。
/// 逻辑删除将行标记为 `is_active = false` 并清零数量; 同一批次再次
/// 入库时该行被原地复活, 历史引用保持有效。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub vaccine: String,
    pub batch_number: String,
    /// Doses on hand, never negative
    pub quantity: i64,
    /// Expiration date, serialized `YYYY-MM-DD`
    pub expiration_date: NaiveDate,
    /// Storage tier; legacy rows imported from the old system may miss it
    #[serde(default)]
    pub level: Option<StockLevel>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub health_center: Option<String>,
    /// Facility staff member this lot is assigned to, if any
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,
}

impl StockLot {
    /// The identity tuple of this lot
    pub fn identity(&self) -> LotIdentity {
        LotIdentity {
            vaccine: self.vaccine.clone(),
            batch_number: self.batch_number.clone(),
            level: self.level.unwrap_or(StockLevel::National),
            region: self.region.clone(),
            health_center: self.health_center.clone(),
            assigned_to: self.assigned_to.clone(),
        }
    }
}

/// Identity tuple of a stock lot - two lots with the same identity must
/// never coexist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotIdentity {
    pub vaccine: String,
    pub batch_number: String,
    pub level: StockLevel,
    pub region: Option<String>,
    pub health_center: Option<String>,
    pub assigned_to: Option<String>,
}

/// Create/merge payload for `POST /api/stocks`
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct StockCreate {
    #[validate(length(min = 1, max = 120))]
    pub vaccine: String,
    #[validate(length(min = 1, max = 60))]
    pub batch_number: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    /// `YYYY-MM-DD`
    pub expiration_date: String,
    /// Only meaningful for national actors creating regional stock rows
    pub region: Option<String>,
    pub health_center: Option<String>,
    pub assigned_to: Option<String>,
}

/// Update payload for `PUT /api/stocks/:id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub quantity: Option<i64>,
    /// `YYYY-MM-DD`
    pub expiration_date: Option<String>,
    pub assigned_to: Option<String>,
}

/// Consumption payload for `POST /api/stocks/consume`
///
/// 接种完成事件的协作接口: 在调用者所在机构按 FEFO 扣减。
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
pub struct StockConsume {
    #[validate(length(min = 1, max = 120))]
    pub vaccine: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
}
