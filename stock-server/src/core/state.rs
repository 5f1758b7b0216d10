//! Server State
//!
//! 持有所有服务的共享引用; Arc 浅拷贝, 克隆成本极低。

use std::sync::Arc;
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::local::Db;

use crate::alerting::{AlertDeduplicator, AlertService, Thresholds, scheduler};
use crate::auth::JwtService;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::Config;
use crate::db::DbService;
use crate::db::repository::{NotificationRepository, StockRepository, TransferRepository};
use crate::inventory::InventoryLedger;
use crate::realtime::{ConnectionRegistry, NotificationFanout, run_listener, run_sweeper};
use crate::transfers::TransferEngine;
use crate::utils::time::now_millis;

/// 服务器状态 - 核心服务的单例引用
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | db | 嵌入式数据库 (SurrealDB) |
/// | registry | 实时连接注册表 |
/// | fanout | 房间制通知分发 |
/// | ledger | 库存台账 |
/// | transfers | 转移状态机 |
/// | alerts | 告警服务 (去重 + 存档 + 分发) |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub db: Surreal<Db>,
    pub registry: Arc<ConnectionRegistry>,
    pub fanout: NotificationFanout,
    pub ledger: Arc<InventoryLedger>,
    pub transfers: Arc<TransferEngine>,
    pub alerts: Arc<AlertService>,
    jwt_service: Arc<JwtService>,
    started_at: i64,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 按顺序: 工作目录 → 数据库 → 注册表/分发 → 台账/告警/转移。
    ///
    /// # Panics
    ///
    /// 工作目录或数据库初始化失败时 panic
    pub async fn initialize(config: &Config) -> Self {
        config
            .ensure_work_dir_structure()
            .expect("Failed to create work directory structure");

        let db_path = config.database_dir().join("stock.db");
        let db_service = DbService::new(&db_path.to_string_lossy())
            .await
            .expect("Failed to initialize database");
        let db = db_service.db;

        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(
            config.connection_idle_timeout_minutes * 60,
        )));
        let fanout = NotificationFanout::new(registry.clone());

        let notifications = NotificationRepository::new(db.clone());
        let dedup = AlertDeduplicator::new(notifications.clone(), config.alert_dedup_window_hours);
        let alerts = Arc::new(AlertService::new(
            Thresholds::from(config),
            notifications,
            dedup,
            fanout.clone(),
        ));

        let ledger = Arc::new(InventoryLedger::new(StockRepository::new(db.clone())));
        let transfers = Arc::new(TransferEngine::new(
            TransferRepository::new(db.clone()),
            ledger.clone(),
            alerts.clone(),
        ));

        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

        Self {
            config: config.clone(),
            db,
            registry,
            fanout,
            ledger,
            transfers,
            alerts,
            jwt_service,
            started_at: now_millis(),
        }
    }

    /// 注册后台任务: 实时通道监听、空闲连接清扫、每日库存扫描
    ///
    /// 必须在 `Server::run()` 内启动 HTTP 监听之前调用
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let token = tasks.shutdown_token();

        tasks.spawn(
            "realtime_listener",
            TaskKind::Listener,
            run_listener(
                self.registry.clone(),
                self.config.realtime_tcp_port,
                token.clone(),
            ),
        );

        tasks.spawn(
            "connection_sweeper",
            TaskKind::Periodic,
            run_sweeper(
                self.registry.clone(),
                Duration::from_secs(self.config.connection_sweep_interval_minutes * 60),
                token.clone(),
            ),
        );

        tasks.spawn(
            "stock_scan",
            TaskKind::Periodic,
            scheduler::run(
                self.ledger.clone(),
                self.alerts.clone(),
                Duration::from_secs(self.config.stock_scan_interval_hours * 3600),
                token,
            ),
        );
    }

    /// 获取 JWT 服务
    pub fn jwt_service(&self) -> Arc<JwtService> {
        self.jwt_service.clone()
    }

    /// 启动至今的秒数
    pub fn uptime_seconds(&self) -> i64 {
        (now_millis() - self.started_at) / 1000
    }

    /// 当前在线客户端数
    pub fn connected_clients(&self) -> usize {
        self.registry.len()
    }
}
