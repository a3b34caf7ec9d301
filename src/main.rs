//! infra-agent HTTP 服务
//!
//! 入口：加载配置、初始化日志、启动 MCP 工具服务、装配智能体与编排器，并运行 axum 服务直到收到关闭信号。
//!
//! 环境变量:
//! - OPENAI_API_KEY: LLM API Key（也可写在 [llm] api_key）
//! - GITLAB_TOKEN: 创建 Merge Request 用的默认 Token
//! - INFRA_AGENT_CONFIG: 额外的配置文件路径
//! - INFRA_AGENT__*: 覆盖任意配置项，如 INFRA_AGENT__SERVER__BIND=127.0.0.1:9000

use std::sync::Arc;

use anyhow::Context;
use infra_agent::config::load_config;
use infra_agent::core::{
    spawn_history_sweeper, AppBuilder, McpServersCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
use infra_agent::gateway::create_router;
use infra_agent::observability;
use infra_agent::tools::mcp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load configuration")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let (mcp_servers, mcp_tools) = mcp::start_all(&cfg.mcp.servers)
        .await
        .context("Failed to start MCP servers")?;
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(McpServersCleanup::new(mcp_servers));

    let state = AppBuilder::new(cfg.clone())
        .with_mcp_tools(mcp_tools)
        .with_cancel_token(shutdown.token())
        .build()
        .context("Failed to build agents")?;

    let sweeper = spawn_history_sweeper(
        state.terraform.clone(),
        cfg.history.idle_ttl_secs,
        cfg.history.sweep_interval_secs,
        shutdown.token(),
    );

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!("infra-agent listening on http://{}", cfg.server.bind);

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await;

    let reason = match &served {
        Ok(()) => ShutdownReason::Terminate,
        Err(e) => ShutdownReason::FatalError(e.to_string()),
    };
    shutdown.shutdown(reason);
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    coordinator.run_cleanup().await;

    served.context("HTTP server failed")?;
    Ok(())
}
