//! Transfer API Handlers

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use validator::Validate;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::db::models::{TransferInitiate, TransferRecord, TransferRespond};
use crate::utils::{AppError, AppResult};

/// POST /api/stocks/transfers/initiate - 发起转移
pub async fn initiate(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<TransferInitiate>,
) -> AppResult<Json<TransferRecord>> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    let record = state.transfers.initiate(&user, &payload).await?;
    Ok(Json(record))
}

/// PUT /api/stocks/transfers/:id/accept - 接收方接受
pub async fn accept(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<TransferRecord>> {
    let record = state.transfers.accept(&user, &id).await?;
    Ok(Json(record))
}

/// PUT /api/stocks/transfers/:id/reject - 接收方拒绝, 数量退回源批次
pub async fn reject(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(payload): Json<TransferRespond>,
) -> AppResult<Json<TransferRecord>> {
    let record = state.transfers.reject(&user, &id, payload.reason).await?;
    Ok(Json(record))
}

/// PUT /api/stocks/transfers/:id/cancel - 发起方撤回
pub async fn cancel(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(payload): Json<TransferRespond>,
) -> AppResult<Json<TransferRecord>> {
    let record = state.transfers.cancel(&user, &id, payload.reason).await?;
    Ok(Json(record))
}

/// GET /api/stocks/transfers/incoming - 待本人响应的转移
pub async fn incoming(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<TransferRecord>>> {
    Ok(Json(state.transfers.incoming(&user).await?))
}

/// GET /api/stocks/transfers/outgoing - 本人发起的转移
pub async fn outgoing(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<TransferRecord>>> {
    Ok(Json(state.transfers.outgoing(&user).await?))
}

/// GET /api/stocks/transfers/history - 与本人相关的全部记录
pub async fn history(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<TransferRecord>>> {
    Ok(Json(state.transfers.history(&user).await?))
}
