//! 库存可见性策略表
//!
//! Who sees which lots is a first-class policy, not ad-hoc filtering in
//! handlers:
//!
//! | 角色 | 可见范围 |
//! |------|----------|
//! | national | `level = national` 的批次, 外加旧系统遗留的无层级且无大区的行 |
//! | regional | 本大区内 `level = regional` 的批次 |
//! | district | 本卫生中心的全部批次 (机构管理员) |
//! | agent | 本卫生中心的批次; `assigned_only` 员工只看分配给自己的 |
//!
//! The same scope drives both `GET /api/stocks` and per-lot write
//! authorization, so read and write visibility cannot drift apart.

use shared::{Role, StockLevel};

use crate::auth::CurrentUser;
use crate::db::models::StockLot;
use crate::utils::{AppError, AppResult};

/// Resolved visibility scope of one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    National,
    Region(String),
    HealthCenter {
        health_center: String,
        /// `Some(user_id)` restricts to lots assigned to that user
        assigned_to: Option<String>,
    },
}

/// Resolve the scope for an actor; fails when the claims are missing the
/// location the role requires.
pub fn scope_for(user: &CurrentUser) -> AppResult<Scope> {
    match user.role {
        Role::National => Ok(Scope::National),
        Role::Regional => {
            let region = user
                .region
                .clone()
                .ok_or_else(|| AppError::validation("Regional account has no region"))?;
            Ok(Scope::Region(region))
        }
        Role::District => {
            let health_center = user.health_center.clone().ok_or_else(|| {
                AppError::validation("District account has no health center")
            })?;
            Ok(Scope::HealthCenter {
                health_center,
                assigned_to: None,
            })
        }
        Role::Agent => {
            let health_center = user.health_center.clone().ok_or_else(|| {
                AppError::validation("Agent account has no health center")
            })?;
            let assigned_to = user.assigned_only.then(|| user.id.clone());
            Ok(Scope::HealthCenter {
                health_center,
                assigned_to,
            })
        }
    }
}

/// Whether one lot falls inside the actor's scope
pub fn can_access(user: &CurrentUser, lot: &StockLot) -> bool {
    match scope_for(user) {
        Ok(scope) => lot_in_scope(&scope, lot),
        Err(_) => false,
    }
}

fn lot_in_scope(scope: &Scope, lot: &StockLot) -> bool {
    match scope {
        Scope::National => {
            lot.level == Some(StockLevel::National)
                || (lot.level.is_none() && lot.region.is_none())
        }
        Scope::Region(region) => {
            lot.level == Some(StockLevel::Regional) && lot.region.as_deref() == Some(region)
        }
        Scope::HealthCenter {
            health_center,
            assigned_to,
        } => {
            if lot.health_center.as_deref() != Some(health_center) {
                return false;
            }
            match assigned_to {
                Some(user_id) => lot.assigned_to.as_deref() == Some(user_id),
                None => true,
            }
        }
    }
}
