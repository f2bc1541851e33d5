//! 失败分类与重试策略
//!
//! 三类失败各自处理：
//! - 决策源失败：限流则退避后重试同一轮（受每轮次数与任务墙钟上限约束），其它错误直接终止；
//! - 协议失败：由循环记录为历史后继续；
//! - 工具执行失败：返回文本含 failed / timeout / error（大小写不敏感）或提供方标记 isError。

use std::time::Duration;

use crate::config::LoopSettings;
use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;

/// 工具返回文本中表示失败的关键字（小写比较）
const FAILURE_MARKERS: [&str; 3] = ["failed", "timeout", "error"];

/// 工具调用结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    Failed,
}

/// 限流重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// 单轮内最多重试次数
    pub max_retries: u32,
    /// 任务整体墙钟上限
    pub max_wall_clock: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &LoopSettings) -> Self {
        Self {
            backoff: settings.rate_limit_backoff,
            max_retries: settings.max_rate_limit_retries,
            max_wall_clock: settings.max_wall_clock,
        }
    }
}

/// 语义化错误恢复：将失败映射为可执行动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 决策源失败：retries 为本轮已重试次数，elapsed 为任务已耗时
    pub fn handle_llm_error(&self, err: &LlmError, retries: u32, elapsed: Duration) -> RecoveryAction {
        match err {
            LlmError::RateLimited(msg) => {
                if retries >= self.policy.max_retries {
                    RecoveryAction::Abort(AgentError::InfrastructureTransient(format!(
                        "{} retries in one iteration ({})",
                        retries, msg
                    )))
                } else if elapsed
                    .checked_add(self.policy.backoff)
                    .map_or(true, |resume_at| resume_at > self.policy.max_wall_clock)
                {
                    RecoveryAction::Abort(AgentError::InfrastructureTransient(format!(
                        "wall-clock limit of {}s reached ({})",
                        self.policy.max_wall_clock.as_secs(),
                        msg
                    )))
                } else {
                    RecoveryAction::Backoff(self.policy.backoff)
                }
            }
            LlmError::Request(msg) => RecoveryAction::Abort(AgentError::InfrastructureFatal(msg.clone())),
        }
    }

    /// 工具返回分类：提供方标记失败，或文本含失败关键字
    pub fn classify_tool_output(&self, text: &str, reported_error: bool) -> ToolOutcome {
        let lower = text.to_lowercase();
        if reported_error || FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
            ToolOutcome::Failed
        } else {
            ToolOutcome::Succeeded
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::from_settings(&LoopSettings::default()))
    }
}
