//! Mock 能力提供方（用于测试，无需子进程）
//!
//! 提供一组 Playwright 风格的工具描述；调用时按工具名回放预设结果，未预设则回显 "<tool> ok"。
//! 调用记录与会话关闭次数在工厂打开的所有会话间共享，便于断言。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{CapabilityProvider, ProviderError, ProviderFactory, ToolDescriptor, ToolResult};

type Replies = HashMap<String, VecDeque<Result<ToolResult, ProviderError>>>;

/// Playwright MCP Server 常见工具的精简描述
pub fn browser_tools() -> Vec<ToolDescriptor> {
    let schema = |props: Value, required: Value| json!({"type": "object", "properties": props, "required": required});
    vec![
        ToolDescriptor::from_input_schema(
            "playwright_navigate",
            &schema(json!({"url": {"type": "string"}, "timeout": {"type": "number"}}), json!(["url"])),
        ),
        ToolDescriptor::from_input_schema(
            "playwright_click",
            &schema(json!({"selector": {"type": "string"}}), json!(["selector"])),
        ),
        ToolDescriptor::from_input_schema(
            "playwright_fill",
            &schema(
                json!({"selector": {"type": "string"}, "value": {"type": "string"}}),
                json!(["selector", "value"]),
            ),
        ),
        ToolDescriptor::from_input_schema(
            "playwright_press_key",
            &schema(json!({"key": {"type": "string"}}), json!(["key"])),
        ),
        ToolDescriptor::from_input_schema(
            "playwright_evaluate",
            &schema(json!({"script": {"type": "string"}}), json!(["script"])),
        ),
    ]
}

#[derive(Default)]
struct Shared {
    replies: Mutex<Replies>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// 内存中的提供方会话
pub struct MockProvider {
    tools: Vec<ToolDescriptor>,
    shared: Arc<Shared>,
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    async fn list_capabilities(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(self.tools.clone())
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult, ProviderError> {
        if let Ok(mut calls) = self.shared.calls.lock() {
            calls.push((name.to_string(), arguments));
        }
        let scripted = self
            .shared
            .replies
            .lock()
            .ok()
            .and_then(|mut r| r.get_mut(name).and_then(|q| q.pop_front()));
        scripted.unwrap_or_else(|| Ok(ToolResult::text(format!("{} ok", name))))
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock 会话工厂：可预设工具结果或模拟启动失败
#[derive(Clone, Default)]
pub struct MockProviderFactory {
    tools: Vec<ToolDescriptor>,
    shared: Arc<Shared>,
    fail_open: Option<ProviderError>,
}

impl MockProviderFactory {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    pub fn with_browser_tools() -> Self {
        Self::new(browser_tools())
    }

    /// 打开会话时返回错误（模拟提供方不可用）
    pub fn failing(err: ProviderError) -> Self {
        Self {
            fail_open: Some(err),
            ..Self::default()
        }
    }

    /// 为某工具追加一条预设结果（按调用顺序消费）
    pub fn push_reply(&self, tool: &str, reply: Result<ToolResult, ProviderError>) {
        if let Ok(mut r) = self.shared.replies.lock() {
            r.entry(tool.to_string()).or_default().push_back(reply);
        }
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.shared.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn opened_sessions(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderFactory for MockProviderFactory {
    async fn open(&self) -> Result<Box<dyn CapabilityProvider>, ProviderError> {
        if let Some(err) = &self.fail_open {
            return Err(err.clone());
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProvider {
            tools: self.tools.clone(),
            shared: self.shared.clone(),
        }))
    }
}
