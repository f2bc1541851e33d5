//! 决策源抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：generate(prompt, temperature) 返回一段文本。
//! 失败分两类：限流（可退避重试）与其它错误（任务致命）。

use async_trait::async_trait;
use thiserror::Error;

/// 决策源错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 限流（HTTP 429 / RESOURCE_EXHAUSTED）
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("LLM request failed: {0}")]
    Request(String),
}

impl LlmError {
    /// 按错误文本归类：含 429、RESOURCE_EXHAUSTED 或 rate limit 字样视为限流
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if message.contains("429")
            || message.contains("RESOURCE_EXHAUSTED")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
        {
            LlmError::RateLimited(message)
        } else {
            LlmError::Request(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// 决策源 trait：无状态，单次请求返回完整文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError>;

    /// 是否已配置凭据（供健康检查展示）
    fn is_configured(&self) -> bool {
        true
    }
}
