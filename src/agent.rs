//! Headless Agent 运行时
//!
//! 供 CLI 与 HTTP 任务管理器调用：AgentRunner::run 为单个目标打开一个提供方会话，
//! 拉取工具目录，跑编排循环，并保证无论循环如何结束都关闭会话。

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LoopSettings};
use crate::core::{AgentError, RecoveryEngine, RetryPolicy};
use crate::llm::{LlmClient, OpenAiClient};
use crate::react::{run_loop, LogLevel, LoopOutcome, LoopSession, Planner, ProgressSink};
use crate::tools::{McpProviderFactory, ProviderFactory, ToolCatalog, ToolExecutor};

/// 预构建的 Agent 组件，可被多个任务并发共享（每个任务各自打开提供方会话）
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    providers: Arc<dyn ProviderFactory>,
    settings: LoopSettings,
    system_prompt: String,
    tool_timeout: Duration,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        providers: Arc<dyn ProviderFactory>,
        settings: LoopSettings,
        system_prompt: impl Into<String>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            providers,
            settings,
            system_prompt: system_prompt.into(),
            tool_timeout,
        }
    }

    /// 按配置构建：OpenAI 兼容决策源 + MCP 子进程提供方
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            Arc::new(OpenAiClient::from_config(&cfg.llm)),
            Arc::new(McpProviderFactory::new(cfg.provider.clone())),
            cfg.loop_settings(),
            cfg.agent.system_prompt(),
            Duration::from_secs(cfg.provider.tool_timeout_secs),
        )
    }

    /// 决策源凭据是否已配置
    pub fn llm_configured(&self) -> bool {
        self.llm.is_configured()
    }

    /// 运行单个目标
    ///
    /// 会话打开或工具目录拉取失败时返回 CapabilityUnavailable；其余失败都体现在 LoopOutcome 中。
    pub async fn run(
        &self,
        goal: &str,
        max_iterations: u32,
        sink: &dyn ProgressSink,
    ) -> Result<LoopOutcome, AgentError> {
        sink.log(LogLevel::Info, "Starting agent...").await;

        let provider = self
            .providers
            .open()
            .await
            .map_err(|e| AgentError::CapabilityUnavailable(e.to_string()))?;

        let result = async {
            let tools = provider
                .list_capabilities()
                .await
                .map_err(|e| AgentError::CapabilityUnavailable(e.to_string()))?;
            let catalog = ToolCatalog::new(tools);
            sink.log(LogLevel::Info, &format!("{} tools ready", catalog.len()))
                .await;
            sink.log(LogLevel::Info, &format!("User's Goal: {}", goal)).await;

            let planner = Planner::new(
                self.llm.clone(),
                self.system_prompt.clone(),
                self.settings.temperature,
            );
            let executor = ToolExecutor::new(provider.as_ref(), self.tool_timeout);
            let recovery = RecoveryEngine::new(RetryPolicy::from_settings(&self.settings));
            let session = LoopSession {
                planner: &planner,
                executor: &executor,
                catalog: &catalog,
                recovery: &recovery,
                settings: &self.settings,
                sink,
            };
            Ok::<_, AgentError>(run_loop(&session, goal, max_iterations).await)
        }
        .await;

        if let Err(e) = provider.close().await {
            tracing::warn!(error = %e, "provider session teardown failed");
        }
        result
    }
}
