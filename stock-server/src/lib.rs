//! VaxTrack Stock Server - 疫苗库存与转移告警节点
//!
//! # 架构概述
//!
//! 本 crate 是疫苗接种平台的库存核心，提供:
//!
//! - **库存台账** (`inventory`): 批次数量的唯一事实来源, 原子合并/扣减, FEFO 消耗
//! - **转移工作流** (`transfers`): propose/respond 状态机, 数量守恒
//! - **告警** (`alerting`): 阈值/效期分级, 24h 去重, 每日全量扫描
//! - **实时通道** (`realtime`): 房间制通知分发 (TCP + 内存传输)
//! - **HTTP API** (`api`): RESTful 接口
//!
//! # 模块结构
//!
//! ```text
//! stock-server/src/
//! ├── core/          # 配置、状态、服务器、后台任务
//! ├── auth/          # JWT 验证、角色中间件
//! ├── db/            # 嵌入式 SurrealDB, 模型与仓储
//! ├── inventory/     # 台账与可见性策略
//! ├── transfers/     # 转移状态机
//! ├── alerting/      # 分级、去重、告警服务、定时扫描
//! ├── realtime/      # 连接注册表、分发、TCP 服务
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 错误、日志、时间工具
//! ```

pub mod alerting;
pub mod api;
pub mod auth;
pub mod core;
pub mod db;
pub mod inventory;
pub mod realtime;
pub mod transfers;
pub mod utils;

// Re-export 公共类型
pub use crate::auth::{CurrentUser, JwtService};
pub use crate::core::{Config, Server, ServerState};
pub use crate::inventory::InventoryLedger;
pub use crate::transfers::TransferEngine;
pub use crate::utils::{AppError, AppResult};

pub fn print_banner() {
    println!(
        r#"
 _    __          ______                __
| |  / /___ __  _/_  __/________ ______/ /__
| | / / __ `/ |/_// / / ___/ __ `/ ___/ //_/
| |/ / /_/ />  < / / / /  / /_/ / /__/ ,<
|___/\__,_/_/|_|/_/ /_/   \__,_/\___/_/|_|
              stock server
    "#
    );
}
