//! 主应用程序入口
//!
//! 加载配置、装配协作者、启动 Hub 控制循环与 Axum Web 服务。

use application::Hub;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        read_timeout_ms = config.websocket.read_timeout_ms,
        heartbeat = ?config.websocket.heartbeat_interval(),
        session_policy = ?config.websocket.session_policy,
        require_persistence = config.delivery.require_persistence,
        "配置加载完成"
    );

    let infra = Infrastructure::connect(&config).await?;

    let (hub, hub_task) = Hub::spawn(&config.hub, config.websocket.session_policy);
    let bind_address = config.bind_address();
    let state = AppState::new(config, hub, infra.presence, infra.messages);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    tracing::info!("聊天服务器启动在 http://{}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub_task.abort();
    tracing::info!("聊天服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号");
}
