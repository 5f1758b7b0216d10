//! Stock API Handlers

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use validator::Validate;

use shared::{Role, StockLevel};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::db::models::{LotIdentity, StockConsume, StockCreate, StockLot, StockUpdate};
use crate::db::repository::parse_record_id;
use crate::db::repository::stock::STOCK_TABLE;
use crate::inventory::{can_access, scope_for};
use crate::utils::{AppError, AppResponse, AppResult, ok};

/// GET /api/stocks - 角色范围内的库存列表
pub async fn list(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<StockLot>>> {
    let scope = scope_for(&user)?;
    let lots = state.ledger.visible_lots(&scope).await?;
    Ok(Json(lots))
}

/// POST /api/stocks - 创建/合并批次
///
/// 同一地点再次收到同一批次不会产生重复行, 而是合并加量。
pub async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<StockCreate>,
) -> AppResult<Json<StockLot>> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    let expiration = crate::utils::time::parse_date(&payload.expiration_date)?;
    let identity = identity_for_create(&user, &payload)?;

    let (change, merged) = state
        .ledger
        .find_or_create(&identity, payload.quantity, expiration, &user.id)
        .await?;

    if merged {
        // 合并视作数量变化: 可能触发 restored 穿越
        state.alerts.lot_quantity_changed(&change).await;
    } else {
        state.alerts.lot_created(&change).await;
    }

    Ok(Json(change.lot))
}

/// PUT /api/stocks/:id - 字段更新, 触发阈值复查
pub async fn update(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(payload): Json<StockUpdate>,
) -> AppResult<Json<StockLot>> {
    let lot_id = parse_record_id(STOCK_TABLE, &id)?;
    let existing = state.ledger.get(&lot_id).await?;
    if !can_access(&user, &existing) {
        return Err(AppError::forbidden("Lot is outside your visibility scope"));
    }

    let expiration = match &payload.expiration_date {
        Some(raw) => Some(crate::utils::time::parse_date(raw)?),
        None => None,
    };
    let assigned_to = payload.assigned_to.as_ref().map(|v| Some(v.clone()));

    let change = state
        .ledger
        .update(&lot_id, payload.quantity, expiration, assigned_to)
        .await?;
    state.alerts.lot_updated(&change).await;

    Ok(Json(change.lot))
}

/// DELETE /api/stocks/:id - 逻辑删除 (national 专属, 路由层拦截)
pub async fn delete_lot(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<bool>>> {
    let lot_id = parse_record_id(STOCK_TABLE, &id)?;
    // 确认批次存在, 删除不存在的批次应当报 404
    state.ledger.get(&lot_id).await?;

    let removed = state.ledger.remove(&lot_id).await?;
    tracing::info!(lot = %lot_id, by = %user.id, "Stock lot logically removed");
    Ok(ok(removed))
}

/// POST /api/stocks/consume - 接种消耗 (FEFO 扣减)
///
/// 协作方 (接种完成事件) 的入口: 在调用者机构内按最早效期优先选批扣减。
pub async fn consume(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<StockConsume>,
) -> AppResult<Json<StockLot>> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    if !matches!(user.role, Role::District | Role::Agent) {
        return Err(AppError::forbidden(
            "Only facility actors can record consumption",
        ));
    }
    let health_center = user
        .health_center
        .clone()
        .ok_or_else(|| AppError::validation("Account has no health center"))?;
    let assigned_filter = user.assigned_only.then_some(user.id.as_str());

    let change = state
        .ledger
        .consume_fefo(
            &payload.vaccine,
            &health_center,
            assigned_filter,
            payload.quantity,
        )
        .await?;
    state.alerts.lot_quantity_changed(&change).await;

    Ok(Json(change.lot))
}

/// Placement of a newly received lot, derived from the creator's role
/// and the optional payload location fields:
///
/// | 角色 | 落点 |
/// |------|------|
/// | national | 默认国家库; 指定 `region` 时为该大区的 regional 批次 |
/// | regional | 本大区; 指定 `health_center` 时为该机构的 district 批次 |
/// | district | 本机构; 指定 `assigned_to` 时挂到该员工名下 (agent 层) |
/// | agent | 本机构 agent 层; `assigned_only` 员工自动挂自己名下 |
fn identity_for_create(user: &CurrentUser, payload: &StockCreate) -> AppResult<LotIdentity> {
    let (level, region, health_center, assigned_to) = match user.role {
        Role::National => match &payload.region {
            Some(region) => (StockLevel::Regional, Some(region.clone()), None, None),
            None => (StockLevel::National, None, None, None),
        },
        Role::Regional => {
            let region = user
                .region
                .clone()
                .ok_or_else(|| AppError::validation("Regional account has no region"))?;
            match &payload.health_center {
                Some(hc) => (
                    StockLevel::District,
                    Some(region),
                    Some(hc.clone()),
                    None,
                ),
                None => (StockLevel::Regional, Some(region), None, None),
            }
        }
        Role::District => {
            let hc = user
                .health_center
                .clone()
                .ok_or_else(|| AppError::validation("District account has no health center"))?;
            match &payload.assigned_to {
                Some(agent) => (
                    StockLevel::Agent,
                    user.region.clone(),
                    Some(hc),
                    Some(agent.clone()),
                ),
                None => (StockLevel::District, user.region.clone(), Some(hc), None),
            }
        }
        Role::Agent => {
            let hc = user
                .health_center
                .clone()
                .ok_or_else(|| AppError::validation("Agent account has no health center"))?;
            let assigned = payload
                .assigned_to
                .clone()
                .or_else(|| user.assigned_only.then(|| user.id.clone()));
            (StockLevel::Agent, user.region.clone(), Some(hc), assigned)
        }
    };

    Ok(LotIdentity {
        vaccine: payload.vaccine.clone(),
        batch_number: payload.batch_number.clone(),
        level,
        region,
        health_center,
        assigned_to,
    })
}
