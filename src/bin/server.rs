//! bee-pilot HTTP 服务
//!
//! 启动: cargo run --bin bee-pilot-server --features web
//! 默认监听 0.0.0.0:8000（[server] 段或 PILOT__SERVER__PORT 覆盖）

use std::sync::Arc;

use anyhow::Context;
use bee_pilot::agent::AgentRunner;
use bee_pilot::api;
use bee_pilot::config::load_config;
use bee_pilot::observability;
use bee_pilot::tasks::{IterationLimits, TaskManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let runner = Arc::new(AgentRunner::from_config(&cfg));
    if !runner.llm_configured() {
        tracing::warn!("{} is not set; tasks will fail at the first decision", cfg.llm.api_key_env);
    }

    let manager = Arc::new(TaskManager::new(
        runner,
        IterationLimits::from_config(&cfg.agent),
        cfg.server.max_concurrent_tasks,
    ));
    let app = api::router(manager);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("bee-pilot server listening on http://{}", addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
