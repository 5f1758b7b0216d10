//! Health API
//!
//! 健康检查接口, 无需认证。

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::core::ServerState;

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_seconds: i64,
    pub connected_clients: usize,
}

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/health", get(health))
}

/// GET /api/health - 服务健康信息
async fn health(State(state): State<ServerState>) -> Json<HealthInfo> {
    Json(HealthInfo {
        service: "stock-server",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        uptime_seconds: state.uptime_seconds(),
        connected_clients: state.connected_clients(),
    })
}
