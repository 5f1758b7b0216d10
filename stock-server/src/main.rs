use stock_server::utils::logger;
use stock_server::{Config, Server, ServerState, print_banner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 环境与日志
    dotenv::dotenv().ok();
    let config = Config::from_env();
    config.ensure_work_dir_structure()?;
    if config.environment == "production" {
        let log_dir = config.log_dir();
        logger::init_logger_with_file(None, log_dir.to_str());
    } else {
        logger::init_logger();
    }

    print_banner();
    tracing::info!("VaxTrack stock server starting...");

    // 2. 初始化服务器状态
    let state = ServerState::initialize(&config).await;

    // 3. 启动 (Server::run 会注册后台任务)
    let server = Server::with_state(config, state);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
