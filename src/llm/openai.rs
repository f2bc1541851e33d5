//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；默认指向 Gemini 的 OpenAI 兼容端点。
//! 错误文本经 LlmError::from_message 归类为限流或其它失败。
//! async_openai 自带的 429 指数退避被关闭：限流必须立即上抛，由循环的恢复策略统一计数与退避。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tokio::time::timeout;

use crate::config::LlmSection;
use crate::llm::{LlmClient, LlmError};

/// OpenAI 兼容客户端：单条 user 消息承载完整 prompt，取首条 choice 的 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    configured: bool,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, request_timeout: Duration) -> Self {
        let configured = api_key.is_some();
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key.unwrap_or_else(|| "sk-placeholder".to_string()));

        // max_elapsed_time = 0：首次失败即放弃，不在客户端内部重试
        let no_retry = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(config).with_backoff(no_retry),
            model: model.to_string(),
            request_timeout,
            configured,
        }
    }

    /// 从 [llm] 配置段创建
    pub fn from_config(cfg: &LlmSection) -> Self {
        Self::new(
            &cfg.base_url,
            &cfg.model,
            cfg.api_key(),
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(user)])
            .temperature(temperature)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Request(format!("request timed out after {:?}", self.request_timeout)))?
            .map_err(|e| LlmError::from_message(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}
