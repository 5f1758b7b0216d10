//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`stocks`] - 库存批次接口 (创建/合并、列表、更新、逻辑删除、消耗)
//! - [`transfers`] - 转移工作流接口 (发起、接受、拒绝、撤回、查询)

pub mod health;
pub mod stocks;
pub mod transfers;
