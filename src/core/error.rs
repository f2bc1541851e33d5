//! Agent 错误类型
//!
//! 与 RecoveryEngine 配合：只有 CapabilityUnavailable 与决策源致命错误会终止任务，
//! 其余错误在循环内被吸收为历史条目，影响下一轮决策。

use thiserror::Error;

/// 编排循环中可能出现的错误（能力提供方、决策源、协议、工具、预算）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 能力提供方无法启动或初始化（任务致命）
    #[error("Capability provider unavailable: {0}")]
    CapabilityUnavailable(String),

    /// 限流重试次数或墙钟时间耗尽（任务致命）
    #[error("Rate limit retries exhausted: {0}")]
    InfrastructureTransient(String),

    /// 决策源的其它失败（任务致命）
    #[error("Decision source failed: {0}")]
    InfrastructureFatal(String),

    #[error("Invalid response format")]
    ProtocolMalformed,

    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Cannot convert '{value}' for parameter '{param}' to {kind}")]
    Coercion {
        param: String,
        value: String,
        kind: String,
    },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailure(String),

    #[error("Max iterations reached without completing task")]
    BudgetExhausted,
}

impl AgentError {
    /// 是否终止整个任务（其余错误仅记录并继续下一轮）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::CapabilityUnavailable(_)
                | AgentError::InfrastructureTransient(_)
                | AgentError::InfrastructureFatal(_)
        )
    }
}

/// 恢复引擎对决策源失败给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后重试同一轮（不消耗迭代预算）
    Backoff(std::time::Duration),
    /// 终止任务
    Abort(AgentError),
}
