use crate::auth::JwtConfig;

/// 服务器配置 - 库存节点的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/vaxtrack/stock | 工作目录 |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | REALTIME_TCP_PORT | 8081 | 实时通道 TCP 端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOW_STOCK_THRESHOLD | 10 | 低库存阈值 (剂) |
/// | EXPIRING_WINDOW_DAYS | 30 | 临期预警窗口 (天) |
/// | ALERT_DEDUP_WINDOW_HOURS | 24 | 告警去重窗口 (小时) |
/// | STOCK_SCAN_INTERVAL_HOURS | 24 | 全量扫描周期 (小时) |
/// | CONNECTION_IDLE_TIMEOUT_MINUTES | 30 | 连接空闲超时 (分钟) |
/// | CONNECTION_SWEEP_INTERVAL_MINUTES | 5 | 空闲连接清理周期 (分钟) |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/vaxtrack HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库、日志等文件
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// 实时通道 TCP 端口 (客户端直连)
    pub realtime_tcp_port: u16,
    /// JWT 认证配置
    pub jwt: JwtConfig,
    /// 运行环境: development | staging | production
    pub environment: String,

    // === 告警策略 ===
    //
    // 阈值集中在这里, 同步检查路径和定时扫描消费同一份配置,
    // 不允许在调用点各自写死.
    /// 低库存阈值 (剂)
    pub low_stock_threshold: i64,
    /// 临期预警窗口 (天)
    pub expiring_window_days: i64,
    /// 告警去重窗口 (小时)
    pub alert_dedup_window_hours: i64,
    /// 全量库存扫描周期 (小时)
    pub stock_scan_interval_hours: u64,

    // === 实时通道 ===
    /// 连接空闲超时 (分钟)
    pub connection_idle_timeout_minutes: u64,
    /// 空闲连接清理周期 (分钟)
    pub connection_sweep_interval_minutes: u64,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR")
                .unwrap_or_else(|_| "/var/lib/vaxtrack/stock".into()),
            http_port: env_parse("HTTP_PORT", 3000),
            realtime_tcp_port: env_parse("REALTIME_TCP_PORT", 8081),
            jwt: JwtConfig::from_env(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            low_stock_threshold: env_parse("LOW_STOCK_THRESHOLD", 10),
            expiring_window_days: env_parse("EXPIRING_WINDOW_DAYS", 30),
            alert_dedup_window_hours: env_parse("ALERT_DEDUP_WINDOW_HOURS", 24),
            stock_scan_interval_hours: env_parse("STOCK_SCAN_INTERVAL_HOURS", 24),

            connection_idle_timeout_minutes: env_parse("CONNECTION_IDLE_TIMEOUT_MINUTES", 30),
            connection_sweep_interval_minutes: env_parse("CONNECTION_SWEEP_INTERVAL_MINUTES", 5),
        }
    }

    /// 数据库目录: {work_dir}/database
    pub fn database_dir(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.work_dir).join("database")
    }

    /// 日志目录: {work_dir}/logs
    pub fn log_dir(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.work_dir).join("logs")
    }

    /// Ensure the work directory structure exists
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.database_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
