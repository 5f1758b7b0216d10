//! JWT 令牌服务
//!
//! 只负责验证与解析。令牌签发属于平台的认证服务，不在本节点内。

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::Role;

/// JWT 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// JWT 密钥 (应至少 32 字节, 与签发方共享)
    pub secret: String,
    /// 令牌签发者
    pub issuer: String,
    /// 令牌受众
    pub audience: String,
}

impl JwtConfig {
    /// 从环境变量加载
    pub fn from_env() -> Self {
        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if s.len() >= 32 => s,
            Ok(_) => {
                #[cfg(debug_assertions)]
                {
                    tracing::warn!("JWT_SECRET shorter than 32 bytes, using dev fallback");
                    dev_fallback_secret()
                }
                #[cfg(not(debug_assertions))]
                {
                    panic!("FATAL: JWT_SECRET must be at least 32 bytes");
                }
            }
            Err(_) => {
                #[cfg(debug_assertions)]
                {
                    tracing::warn!("JWT_SECRET not set, using dev fallback");
                    dev_fallback_secret()
                }
                #[cfg(not(debug_assertions))]
                {
                    panic!("FATAL: JWT_SECRET is not configured");
                }
            }
        };

        Self {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "vaxtrack-auth".to_string()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "stock-server".to_string()),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(debug_assertions)]
fn dev_fallback_secret() -> String {
    "dev-only-jwt-secret-must-be-replaced-in-prod".to_string()
}

/// 存储在令牌中的 JWT Claims
///
/// 签发方负责把角色与属地写进令牌; 本节点据此做可见性裁剪。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 ID (Subject)
    pub sub: String,
    /// 用户名
    pub username: String,
    /// 角色名称
    pub role: String,
    /// 所属大区 (regional 及以下)
    #[serde(default)]
    pub region: Option<String>,
    /// 所属卫生中心 (district/agent)
    #[serde(default)]
    pub health_center: Option<String>,
    /// 机构普通员工: 只能看到分配给自己的批次
    #[serde(default)]
    pub assigned_only: bool,
    /// 过期时间戳
    pub exp: i64,
    /// 签发时间戳
    pub iat: i64,
    /// 签发者
    pub iss: String,
    /// 受众
    pub aud: String,
}

/// JWT 错误
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("无效令牌: {0}")]
    InvalidToken(String),

    #[error("令牌已过期")]
    ExpiredToken,

    #[error("无效签名")]
    InvalidSignature,
}

/// JWT 令牌服务 (验证专用)
#[derive(Debug, Clone)]
pub struct JwtService {
    config: JwtConfig,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// 验证令牌并返回 Claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
            ErrorKind::InvalidSignature => JwtError::InvalidSignature,
            other => JwtError::InvalidToken(format!("{:?}", other)),
        })?;

        Ok(data.claims)
    }

    /// 从 `Authorization: Bearer <token>` 头提取令牌
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header.strip_prefix("Bearer ").map(str::trim)
    }
}

/// 当前用户上下文 - 由认证中间件注入请求扩展
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub region: Option<String>,
    pub health_center: Option<String>,
    /// 只能操作分配给自己的批次 (机构普通员工)
    pub assigned_only: bool,
}

impl TryFrom<Claims> for CurrentUser {
    type Error = String;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let role: Role = claims.role.parse()?;
        Ok(Self {
            id: claims.sub,
            username: claims.username,
            role,
            region: claims.region,
            health_center: claims.health_center,
            assigned_only: claims.assigned_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "0123456789abcdef0123456789abcdef".to_string(),
            issuer: "vaxtrack-auth".to_string(),
            audience: "stock-server".to_string(),
        }
    }

    fn make_token(config: &JwtConfig, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(role: &str, exp_offset: i64) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: "user-1".into(),
            username: "awa".into(),
            role: role.into(),
            region: Some("Dakar".into()),
            health_center: None,
            assigned_only: false,
            exp: now + exp_offset,
            iat: now,
            iss: "vaxtrack-auth".into(),
            aud: "stock-server".into(),
        }
    }

    #[test]
    fn valid_token_yields_current_user() {
        let config = test_config();
        let service = JwtService::new(config.clone());
        let token = make_token(&config, &claims("regional", 600));

        let parsed = service.validate_token(&token).unwrap();
        let user = CurrentUser::try_from(parsed).unwrap();
        assert_eq!(user.role, Role::Regional);
        assert_eq!(user.region.as_deref(), Some("Dakar"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let service = JwtService::new(config.clone());
        let token = make_token(&config, &claims("agent", -600));

        assert!(matches!(
            service.validate_token(&token),
            Err(JwtError::ExpiredToken)
        ));
    }

    #[test]
    fn unknown_role_fails_conversion() {
        let parsed = claims("admin", 600);
        assert!(CurrentUser::try_from(parsed).is_err());
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        assert_eq!(JwtService::extract_from_header("Bearer abc"), Some("abc"));
        assert_eq!(JwtService::extract_from_header("Basic abc"), None);
    }
}
