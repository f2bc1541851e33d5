//! 工具执行器
//!
//! 持有当前任务的提供方会话与单次调用超时，execute(tool_name, args) 在超时内调用 provider.invoke，
//! 传输失败或超时转为 AgentError::ToolExecutionFailure；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{CapabilityProvider, ToolResult};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具执行器：对每次调用施加超时，并将传输层结果映射为 AgentError
pub struct ToolExecutor<'a> {
    provider: &'a dyn CapabilityProvider,
    timeout: Duration,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(provider: &'a dyn CapabilityProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// 执行指定工具；超时或传输错误返回 ToolExecutionFailure；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Map<String, Value>) -> Result<ToolResult, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.provider.invoke(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(r)) if !r.is_error => (true, "ok"),
            Ok(Ok(_)) => (false, "reported_error"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailure(e.to_string())),
            Err(_) => Err(AgentError::ToolExecutionFailure(format!(
                "{} timeout after {}s",
                tool_name,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
