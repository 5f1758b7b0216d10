//! 组织层级与角色定义
//!
//! The vaccination program is organized as a four-tier hierarchy
//! (national → regional → district → agent). Actors carry a [`Role`],
//! stock lots carry a [`StockLevel`]; the two vocabularies coincide but
//! are kept as separate types so an actor is never used where a storage
//! tier is expected.
//!
//! Room naming for realtime delivery also lives here so server and
//! clients cannot drift apart on the format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Actor role in the organizational hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    National,
    Regional,
    District,
    Agent,
}

impl Role {
    /// Room name every connection with this role joins on handshake
    pub fn room(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::National => write!(f, "national"),
            Role::Regional => write!(f, "regional"),
            Role::District => write!(f, "district"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "national" => Ok(Role::National),
            "regional" => Ok(Role::Regional),
            "district" => Ok(Role::District),
            "agent" => Ok(Role::Agent),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Storage tier of a stock lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    National,
    Regional,
    District,
    Agent,
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockLevel::National => write!(f, "national"),
            StockLevel::Regional => write!(f, "regional"),
            StockLevel::District => write!(f, "district"),
            StockLevel::Agent => write!(f, "agent"),
        }
    }
}

impl From<Role> for StockLevel {
    fn from(role: Role) -> Self {
        match role {
            Role::National => StockLevel::National,
            Role::Regional => StockLevel::Regional,
            Role::District => StockLevel::District,
            Role::Agent => StockLevel::Agent,
        }
    }
}

impl From<StockLevel> for Role {
    fn from(level: StockLevel) -> Self {
        match level {
            StockLevel::National => Role::National,
            StockLevel::Regional => Role::Regional,
            StockLevel::District => Role::District,
            StockLevel::Agent => Role::Agent,
        }
    }
}

// ========== Room naming ==========

/// Catch-all room every connection joins
pub const ALL_ROOM: &str = "all";

/// Private room of a single user
pub fn user_room(user_id: &str) -> String {
    format!("user_{}", user_id)
}

/// Room for everyone scoped to one region
pub fn region_room(region: &str) -> String {
    format!("region_{}", slug(region))
}

/// Room for everyone scoped to one health center
pub fn health_center_room(health_center: &str) -> String {
    format!("hc_{}", slug(health_center))
}

/// Private room of one parent+child pair
///
/// Targets a single family without a dedicated per-user channel. The
/// phone number is reduced to its digits so formatting variants of the
/// same number land in the same room.
pub fn parent_child_room(parent_phone: &str, child_id: &str) -> String {
    let digits: String = parent_phone
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    format!("parent_{}_child_{}", digits, slug(child_id))
}

/// 房间名归一化: 小写, 非字母数字 → '_'
fn slug(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::National, Role::Regional, Role::District, Role::Agent] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn region_room_is_normalized() {
        assert_eq!(region_room("Thiès"), "region_thi_s");
        assert_eq!(region_room("Dakar"), "region_dakar");
    }

    #[test]
    fn health_center_room_is_normalized() {
        assert_eq!(health_center_room("Fann"), "hc_fann");
        assert_eq!(health_center_room("Keur Massar"), "hc_keur_massar");
    }

    #[test]
    fn parent_child_room_keeps_only_phone_digits() {
        assert_eq!(
            parent_child_room("+221 77 123 45 67", "chd42"),
            "parent_221771234567_child_chd42"
        );
        assert_eq!(
            parent_child_room("771234567", "chd42"),
            parent_child_room("77-123-45-67", "chd42")
        );
    }
}
