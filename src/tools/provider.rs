//! 能力提供方抽象
//!
//! CapabilityProvider：一个会话（list_capabilities / invoke / close），不可跨任务复用；
//! ProviderFactory：每个任务打开一个新会话。

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::ToolDescriptor;

/// 能力提供方错误（启动、通信、协议、超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Failed to start provider: {0}")]
    Spawn(String),

    #[error("Provider initialization failed: {0}")]
    Initialize(String),

    #[error("Provider I/O error: {0}")]
    Io(String),

    #[error("Provider RPC error: {0}")]
    Rpc(String),

    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    #[error("Provider session closed")]
    Closed,
}

/// 工具返回内容：单值或有序多值
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Single(Value),
    Many(Vec<Value>),
}

impl ToolContent {
    /// 转为文本：对象取 text 字段，字符串原样，其余按 JSON 渲染；多值以换行拼接
    pub fn to_text(&self) -> String {
        match self {
            ToolContent::Single(v) => value_text(v),
            ToolContent::Many(items) => items.iter().map(value_text).collect::<Vec<_>>().join("\n"),
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => v.to_string(),
        },
        other => other.to_string(),
    }
}

/// 单次工具调用结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: ToolContent,
    /// 提供方显式标记的失败（MCP isError）
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ToolContent::Many(vec![serde_json::json!({"type": "text", "text": text.into()})]),
            is_error: false,
        }
    }

    /// 解析 MCP tools/call 的 result：{"content": [...] | value, "isError": bool}
    pub fn from_mcp_result(result: Value) -> Self {
        let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
        let content = match result.get("content") {
            Some(Value::Array(items)) => ToolContent::Many(items.clone()),
            Some(other) => ToolContent::Single(other.clone()),
            None => ToolContent::Single(result),
        };
        Self { content, is_error }
    }
}

/// 一个能力提供方会话
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn list_capabilities(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult, ProviderError>;

    /// 释放会话（子进程等）；调用方保证任务结束时调用
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// 会话工厂：每个任务一个独立会话
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CapabilityProvider>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_items_joined_by_newline() {
        let r = ToolResult::from_mcp_result(json!({
            "content": [
                {"type": "text", "text": "Navigated to https://example.com"},
                {"type": "text", "text": "status 200"}
            ]
        }));
        assert!(!r.is_error);
        assert_eq!(r.content.to_text(), "Navigated to https://example.com\nstatus 200");
    }

    #[test]
    fn test_single_and_non_text_values() {
        let r = ToolResult::from_mcp_result(json!({"content": "plain", "isError": true}));
        assert!(r.is_error);
        assert_eq!(r.content.to_text(), "plain");

        let many = ToolContent::Many(vec![json!(42), json!({"type": "image", "data": "x"})]);
        assert_eq!(many.to_text(), "42\n{\"type\":\"image\",\"data\":\"x\"}");
    }
}
