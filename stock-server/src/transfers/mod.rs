//! 转移子系统
//!
//! - [`destination`] - 角色驱动的目的地解析
//! - [`TransferEngine`] - propose/respond 状态机编排

pub mod destination;
pub mod engine;

pub use destination::{Destination, destination_identity, resolve};
pub use engine::TransferEngine;
