//! 认证与角色中间件
//!
//! `require_auth` 验证 Bearer 令牌并把 [`CurrentUser`] 注入请求扩展,
//! 处理器用 `Extension<CurrentUser>` 取用; `require_role` 在其后按
//! 路由组限制角色。
//!
//! 跳过认证的请求: `OPTIONS` 预检、非 `/api/` 路径、`/api/health`。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use shared::Role;

use crate::auth::{CurrentUser, JwtError, JwtService};
use crate::core::ServerState;
use crate::utils::AppError;

/// 认证豁免判定
fn exempt_from_auth(req: &Request) -> bool {
    if req.method() == http::Method::OPTIONS {
        return true;
    }
    let path = req.uri().path();
    // 非 API 路径交给路由层正常 404; 健康检查无需令牌
    !path.starts_with("/api/") || path == "/api/health"
}

/// `Authorization` 头里的 Bearer 令牌
fn bearer_token(req: &Request) -> Result<&str, AppError> {
    let Some(header) = req.headers().get(http::header::AUTHORIZATION) else {
        tracing::warn!(target: "security", uri = %req.uri(), "Missing authorization header");
        return Err(AppError::unauthorized());
    };
    header
        .to_str()
        .ok()
        .and_then(JwtService::extract_from_header)
        .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))
}

/// 认证中间件
///
/// 令牌无效时按错误类别回 401 (`TokenExpired` / `InvalidToken`)。
pub async fn require_auth(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if exempt_from_auth(&req) {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(&req)?;
    let claims = state.jwt_service().validate_token(token).map_err(|e| {
        tracing::warn!(target: "security", error = %e, uri = %req.uri(), "Token validation failed");
        match e {
            JwtError::ExpiredToken => AppError::token_expired(),
            _ => AppError::invalid_token("Invalid token"),
        }
    })?;

    let user = CurrentUser::try_from(claims)
        .map_err(|e| AppError::invalid_token(format!("Malformed JWT claims: {}", e)))?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// 角色检查中间件工厂
///
/// 必须挂在 [`require_auth`] 之内, 否则扩展里没有用户, 一律 401。
///
/// ```ignore
/// .layer(middleware::from_fn(require_role(&[Role::National])))
/// ```
pub fn require_role(
    allowed: &'static [Role],
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>
+ Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let Some(user) = req.extensions().get::<CurrentUser>() else {
                return Err(AppError::unauthorized());
            };
            if allowed.contains(&user.role) {
                return Ok(next.run(req).await);
            }

            tracing::warn!(
                target: "security",
                user_id = %user.id,
                role = %user.role,
                "Role not allowed for this endpoint"
            );
            Err(AppError::forbidden(format!(
                "Role {} is not allowed here",
                user.role
            )))
        })
    }
}
