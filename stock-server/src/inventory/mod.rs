//! 库存台账模块
//!
//! - [`InventoryLedger`] - 数量的唯一事实来源: 原子合并/扣减/贷记,
//!   FEFO 消耗, 角色范围查询
//! - [`visibility`] - 可见性策略表

pub mod ledger;
pub mod visibility;

pub use ledger::{InventoryLedger, LotChange};
pub use visibility::{Scope, can_access, scope_for};
