//! 转移目的地解析
//!
//! 目的层级由发起者角色唯一决定 (每次只能下移一层, agent 之间平级
//! 互转), 缺少该层级要求的定位字段即为非法目的地:
//!
//! | 发起角色 | 目的层级 | 必填字段 |
//! |----------|----------|----------|
//! | national | regional | `to_region` |
//! | regional | district | `to_health_center` |
//! | district | agent    | `to_user_id` |
//! | agent    | agent    | `to_user_id` (同卫生中心同事) |

use shared::{Role, StockLevel};

use crate::auth::CurrentUser;
use crate::db::models::{LotIdentity, TransferInitiate, TransferRecord};
use crate::utils::{AppError, AppResult};

/// Resolved transfer destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub level: StockLevel,
    pub region: Option<String>,
    pub health_center: Option<String>,
    pub user: Option<String>,
}

/// Resolve the destination from the actor's role and the request fields
pub fn resolve(actor: &CurrentUser, request: &TransferInitiate) -> AppResult<Destination> {
    match actor.role {
        Role::National => {
            let region = request.to_region.clone().ok_or_else(|| {
                AppError::invalid_destination("A national transfer requires to_region")
            })?;
            Ok(Destination {
                level: StockLevel::Regional,
                region: Some(region),
                health_center: None,
                user: request.to_user_id.clone(),
            })
        }
        Role::Regional => {
            let health_center = request.to_health_center.clone().ok_or_else(|| {
                AppError::invalid_destination("A regional transfer requires to_health_center")
            })?;
            Ok(Destination {
                level: StockLevel::District,
                region: actor.region.clone(),
                health_center: Some(health_center),
                user: request.to_user_id.clone(),
            })
        }
        Role::District => {
            let user = request.to_user_id.clone().ok_or_else(|| {
                AppError::invalid_destination("A district transfer requires to_user_id")
            })?;
            let health_center = actor.health_center.clone().ok_or_else(|| {
                AppError::invalid_destination("District account has no health center")
            })?;
            Ok(Destination {
                level: StockLevel::Agent,
                region: actor.region.clone(),
                health_center: Some(health_center),
                user: Some(user),
            })
        }
        Role::Agent => {
            let user = request.to_user_id.clone().ok_or_else(|| {
                AppError::invalid_destination("An agent transfer requires to_user_id")
            })?;
            if user == actor.id {
                return Err(AppError::invalid_destination(
                    "Cannot transfer stock to yourself",
                ));
            }
            let health_center = actor.health_center.clone().ok_or_else(|| {
                AppError::invalid_destination("Agent account has no health center")
            })?;
            Ok(Destination {
                level: StockLevel::Agent,
                region: actor.region.clone(),
                health_center: Some(health_center),
                user: Some(user),
            })
        }
    }
}

/// Identity tuple the acceptance will credit
///
/// agent 层批次挂在具体接收人名下 (`assigned_to`), 其余层级归机构。
pub fn destination_identity(record: &TransferRecord) -> LotIdentity {
    let assigned_to = if record.to_level == StockLevel::Agent {
        record.to_user.clone()
    } else {
        None
    };
    LotIdentity {
        vaccine: record.vaccine.clone(),
        batch_number: record.batch_number.clone(),
        level: record.to_level,
        region: record.to_region.clone(),
        health_center: record.to_health_center.clone(),
        assigned_to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role, region: Option<&str>, hc: Option<&str>) -> CurrentUser {
        CurrentUser {
            id: "actor-1".into(),
            username: "test".into(),
            role,
            region: region.map(str::to_string),
            health_center: hc.map(str::to_string),
            assigned_only: false,
        }
    }

    fn request(
        to_region: Option<&str>,
        to_health_center: Option<&str>,
        to_user_id: Option<&str>,
    ) -> TransferInitiate {
        TransferInitiate {
            stock_id: "stock:abc".into(),
            quantity: 10,
            to_region: to_region.map(str::to_string),
            to_health_center: to_health_center.map(str::to_string),
            to_user_id: to_user_id.map(str::to_string),
            auto_accept: false,
            notes: None,
        }
    }

    #[test]
    fn each_role_descends_exactly_one_level() {
        let national = resolve(
            &actor(Role::National, None, None),
            &request(Some("Thiès"), None, None),
        )
        .unwrap();
        assert_eq!(national.level, StockLevel::Regional);
        assert_eq!(national.region.as_deref(), Some("Thiès"));

        let regional = resolve(
            &actor(Role::Regional, Some("Dakar"), None),
            &request(None, Some("Fann"), None),
        )
        .unwrap();
        assert_eq!(regional.level, StockLevel::District);
        assert_eq!(regional.health_center.as_deref(), Some("Fann"));
        // 大区随发起者带下去
        assert_eq!(regional.region.as_deref(), Some("Dakar"));

        let district = resolve(
            &actor(Role::District, Some("Dakar"), Some("Fann")),
            &request(None, None, Some("agent-9")),
        )
        .unwrap();
        assert_eq!(district.level, StockLevel::Agent);
        assert_eq!(district.user.as_deref(), Some("agent-9"));
    }

    #[test]
    fn missing_required_field_is_an_invalid_destination() {
        let err = resolve(&actor(Role::National, None, None), &request(None, None, None))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidDestination(_)));

        let err = resolve(
            &actor(Role::Regional, Some("Dakar"), None),
            &request(None, None, None),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidDestination(_)));
    }

    #[test]
    fn agent_cannot_transfer_to_itself() {
        let err = resolve(
            &actor(Role::Agent, None, Some("Fann")),
            &request(None, None, Some("actor-1")),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidDestination(_)));
    }
}
