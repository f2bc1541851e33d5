//! 编排主循环
//!
//! 拼 prompt（目标 + 最近历史）-> 取得决策 -> 校验并派发工具 -> 分类结果 -> 追加历史 -> 下一轮，
//! 直到得到最终答案或迭代预算耗尽。单轮内的协议、未知工具、参数与工具失败都只记录不中止；
//! 只有决策源致命失败（含限流重试耗尽）会提前结束。

use std::time::Instant;

use crate::config::LoopSettings;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, ToolOutcome};
use crate::react::memory::truncate_chars;
use crate::react::{parse_decision, Decision, IterationRecord, LogLevel, LoopMemory, Planner, ProgressSink};
use crate::tools::{prepare_call, ToolCatalog, ToolExecutor};

/// 工具结果展示 / 成功记录的最大字符数
const DISPLAY_CHARS: usize = 200;
/// 失败历史条目中结果摘录的最大字符数
const FAILED_HISTORY_CHARS: usize = 80;
/// 脚本求值返回值回显到历史的最大字符数
const SCRIPT_VALUE_CHARS: usize = 100;
/// 异常信息写入历史 / 执行记录的最大字符数
const ERROR_HISTORY_CHARS: usize = 50;
const ERROR_LOG_CHARS: usize = 100;
/// 视为「无返回值」的脚本结果
const NULL_LIKE_TOKENS: [&str; 3] = ["null", "undefined", ""];

pub const EARLY_STOP_MESSAGE: &str = "Stopped early: decision source failed";

/// 循环终止结果
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub success: bool,
    pub result: String,
    pub iterations: u32,
    pub history: Vec<String>,
    pub execution_log: Vec<IterationRecord>,
    /// 决策源致命失败时的错误信息
    pub error: Option<String>,
}

/// 循环会话：单个任务运行所需的全部协作者
pub struct LoopSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor<'a>,
    pub catalog: &'a ToolCatalog,
    pub recovery: &'a RecoveryEngine,
    pub settings: &'a LoopSettings,
    pub sink: &'a dyn ProgressSink,
}

/// 执行编排循环
pub async fn run_loop(session: &LoopSession<'_>, goal: &str, max_iterations: u32) -> LoopOutcome {
    let sink = session.sink;
    let started = Instant::now();
    let mut memory = LoopMemory::new(session.settings.history_window);

    for i in 0..max_iterations {
        let iteration = i + 1;
        sink.log(LogLevel::Info, &format!("Iteration {}/{}", iteration, max_iterations))
            .await;

        let prompt = if i == 0 {
            session.planner.first_prompt(goal)
        } else {
            session
                .planner
                .next_prompt(session.catalog.digest(), goal, memory.recent())
        };

        let text = match obtain_decision(session, &prompt, started).await {
            Ok(t) => t,
            Err(e) => {
                let msg = e.to_string();
                sink.log(LogLevel::Error, &truncate_chars(&msg, ERROR_LOG_CHARS)).await;
                let (history, execution_log) = memory.into_parts();
                return LoopOutcome {
                    success: false,
                    result: EARLY_STOP_MESSAGE.to_string(),
                    iterations: i,
                    history,
                    execution_log,
                    error: Some(msg),
                };
            }
        };
        sink.log(LogLevel::Info, &text).await;

        match parse_decision(&text, &session.settings.script_tool) {
            Decision::FinalAnswer { text: answer } => {
                sink.log(LogLevel::Info, &format!("DONE: {}", answer)).await;
                memory.record(None, IterationRecord::success(iteration, &text, answer.clone()));
                sink.iteration_recorded(&memory).await;
                let (history, execution_log) = memory.into_parts();
                return LoopOutcome {
                    success: true,
                    result: answer,
                    iterations: iteration,
                    history,
                    execution_log,
                    error: None,
                };
            }
            Decision::Unparseable => {
                sink.log(LogLevel::Warning, "Invalid format").await;
                let reason = AgentError::ProtocolMalformed.to_string();
                memory.record(Some(reason.clone()), IterationRecord::error(iteration, &text, reason));
            }
            Decision::ToolInvocation {
                tool_name,
                positional_values,
            } => {
                sink.log(LogLevel::Info, &format!("{} | {:?}", tool_name, positional_values))
                    .await;
                let (entry, record) =
                    dispatch(session, iteration, &text, &tool_name, &positional_values).await;
                memory.record(Some(entry), record);
            }
        }

        sink.iteration_recorded(&memory).await;
    }

    sink.log(LogLevel::Warning, "!! Max iterations reached").await;
    let (history, execution_log) = memory.into_parts();
    LoopOutcome {
        success: false,
        result: AgentError::BudgetExhausted.to_string(),
        iterations: max_iterations,
        history,
        execution_log,
        error: None,
    }
}

/// 调用决策源；限流时退避后重试同一轮，不消耗迭代预算
async fn obtain_decision(
    session: &LoopSession<'_>,
    prompt: &str,
    started: Instant,
) -> Result<String, AgentError> {
    let mut retries = 0u32;
    loop {
        match session.planner.plan(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) => match session.recovery.handle_llm_error(&e, retries, started.elapsed()) {
                RecoveryAction::Backoff(wait) => {
                    session
                        .sink
                        .log(
                            LogLevel::Warning,
                            &format!("Rate limit - waiting {}s...", wait.as_secs_f32()),
                        )
                        .await;
                    tokio::time::sleep(wait).await;
                    retries += 1;
                }
                RecoveryAction::Abort(err) => return Err(err),
            },
        }
    }
}

/// 解析工具 -> 转换参数 -> 派发 -> 分类，返回（历史条目, 执行记录）
async fn dispatch(
    session: &LoopSession<'_>,
    iteration: u32,
    response: &str,
    tool_name: &str,
    values: &[String],
) -> (String, IterationRecord) {
    let sink = session.sink;

    let args = match prepare_call(session.catalog, tool_name, values) {
        Ok(args) => args,
        Err(e @ AgentError::UnknownTool(_)) => {
            sink.log(LogLevel::Error, "Unknown tool").await;
            let reason = e.to_string();
            return (reason.clone(), IterationRecord::error(iteration, response, reason));
        }
        Err(e) => return tool_error(sink, iteration, response, tool_name, &e).await,
    };

    sink.log(
        LogLevel::Info,
        &format!("Executing: {}", serde_json::Value::Object(args.clone())),
    )
    .await;

    let result = match session.executor.execute(tool_name, args).await {
        Ok(r) => r,
        Err(e) => return tool_error(sink, iteration, response, tool_name, &e).await,
    };

    let text = result.content.to_text();
    let display = truncate_chars(&text, DISPLAY_CHARS);

    match session.recovery.classify_tool_output(&text, result.is_error) {
        ToolOutcome::Failed => {
            sink.log(LogLevel::Warning, &format!("!! {}", display)).await;
            let excerpt = truncate_chars(&display, FAILED_HISTORY_CHARS);
            (
                format!("!! {} FAILED: {}", tool_name, excerpt),
                IterationRecord::failed(iteration, response, excerpt),
            )
        }
        ToolOutcome::Succeeded => {
            sink.log(LogLevel::Info, &display).await;
            let value = text.trim();
            let entry = if tool_name == session.settings.script_tool && !NULL_LIKE_TOKENS.contains(&value) {
                format!("{} returned: \"{}\"", tool_name, truncate_chars(value, SCRIPT_VALUE_CHARS))
            } else {
                format!("{} succeeded", tool_name)
            };
            (entry, IterationRecord::success(iteration, response, display))
        }
    }
}

async fn tool_error(
    sink: &dyn ProgressSink,
    iteration: u32,
    response: &str,
    tool_name: &str,
    err: &AgentError,
) -> (String, IterationRecord) {
    let msg = err.to_string();
    sink.log(LogLevel::Error, &msg).await;
    // 历史条目已带工具名与 "error:"，只保留原因本身
    let reason = match err {
        AgentError::ToolExecutionFailure(inner) => inner.clone(),
        other => other.to_string(),
    };
    (
        format!("!! {} error: {}", tool_name, truncate_chars(&reason, ERROR_HISTORY_CHARS)),
        IterationRecord::error(iteration, response, truncate_chars(&msg, ERROR_LOG_CHARS)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::react::IterationStatus;
    use crate::tools::{CapabilityProvider, MockProviderFactory, ProviderError, ProviderFactory, ToolResult};

    /// 收集日志与每轮快照长度
    #[derive(Default)]
    struct CollectingSink {
        logs: Mutex<Vec<(LogLevel, String)>>,
        snapshots: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn log(&self, level: LogLevel, message: &str) {
            self.logs.lock().unwrap().push((level, message.to_string()));
        }

        async fn iteration_recorded(&self, memory: &LoopMemory) {
            self.snapshots.lock().unwrap().push(memory.execution_log().len());
        }
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            rate_limit_backoff: Duration::from_millis(1),
            ..LoopSettings::default()
        }
    }

    struct Harness {
        llm: Arc<ScriptedLlmClient>,
        factory: MockProviderFactory,
        settings: LoopSettings,
        sink: CollectingSink,
    }

    impl Harness {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                llm: Arc::new(ScriptedLlmClient::new(replies)),
                factory: MockProviderFactory::with_browser_tools(),
                settings: settings(),
                sink: CollectingSink::default(),
            }
        }

        fn texts(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        async fn run(&self, max_iterations: u32) -> LoopOutcome {
            let provider: Box<dyn CapabilityProvider> = self.factory.open().await.unwrap();
            let catalog = ToolCatalog::new(provider.list_capabilities().await.unwrap());
            let planner = Planner::new(self.llm.clone(), "SYS", 0.1);
            let executor = ToolExecutor::new(provider.as_ref(), Duration::from_secs(5));
            let recovery = RecoveryEngine::new(crate::core::RetryPolicy::from_settings(&self.settings));
            let session = LoopSession {
                planner: &planner,
                executor: &executor,
                catalog: &catalog,
                recovery: &recovery,
                settings: &self.settings,
                sink: &self.sink,
            };
            run_loop(&session, "find the price", max_iterations).await
        }
    }

    #[tokio::test]
    async fn test_final_answer_terminates() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_navigate | https://shop.example",
            "FINAL_ANSWER: $999",
        ]);
        let out = h.run(15).await;
        assert!(out.success);
        assert_eq!(out.result, "$999");
        assert_eq!(out.iterations, 2);
        assert_eq!(out.history, vec!["playwright_navigate succeeded"]);
        assert_eq!(out.execution_log.len(), 2);
        assert_eq!(out.execution_log[1].status, IterationStatus::Success);
        assert_eq!(*h.sink.snapshots.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_budget_exhausted_after_exact_iterations() {
        let h = Harness::texts(&["I am thinking about it"]);
        let out = h.run(5).await;
        assert!(!out.success);
        assert_eq!(out.result, AgentError::BudgetExhausted.to_string());
        assert_eq!(out.iterations, 5);
        assert_eq!(out.execution_log.len(), 5);
        assert!(out.history.iter().all(|h| h == "Invalid response format"));
        assert_eq!(h.llm.call_count(), 5);
    }

    #[tokio::test]
    async fn test_timeout_payload_recorded_as_failure_and_loop_continues() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_click | #buy",
            "TOOL_CALL: playwright_click | #buy-now",
            "FINAL_ANSWER: bought",
        ]);
        h.factory.push_reply(
            "playwright_click",
            Ok(ToolResult::text("Operation TimeOut waiting for selector #buy")),
        );
        let out = h.run(15).await;
        assert!(out.success);
        assert_eq!(out.iterations, 3);
        assert!(out.history[0].starts_with("!! playwright_click FAILED: "));
        assert_eq!(out.execution_log[0].status, IterationStatus::Failed);
        assert_eq!(out.history[1], "playwright_click succeeded");
    }

    #[tokio::test]
    async fn test_script_value_echoed_into_history() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_evaluate | document.querySelector('.a')?.textContent || 'none'",
            "TOOL_CALL: playwright_evaluate | window.scrollBy(0, 500)",
            "FINAL_ANSWER: $5",
        ]);
        h.factory.push_reply("playwright_evaluate", Ok(ToolResult::text("  $5.00 ")));
        h.factory.push_reply("playwright_evaluate", Ok(ToolResult::text("undefined")));
        let out = h.run(10).await;
        assert_eq!(out.history[0], "playwright_evaluate returned: \"$5.00\"");
        assert_eq!(out.history[1], "playwright_evaluate succeeded");
        let calls = h.factory.calls();
        assert_eq!(
            calls[0].1.get("script").and_then(|v| v.as_str()),
            Some("document.querySelector('.a')?.textContent || 'none'")
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_and_coercion_error_are_recorded() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_teleport | mars",
            "TOOL_CALL: playwright_navigate | https://a.com | soon",
            "FINAL_ANSWER: gave up",
        ]);
        let out = h.run(10).await;
        assert_eq!(out.history[0], "Tool 'playwright_teleport' not found");
        assert!(out.history[1].starts_with("!! playwright_navigate error: "));
        assert_eq!(out.execution_log[1].status, IterationStatus::Error);
        assert!(h.factory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_history_keeps_reason() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_click | #checkout",
            "FINAL_ANSWER: stuck",
        ]);
        h.factory.push_reply("playwright_click", Err(ProviderError::Timeout(60)));
        let out = h.run(5).await;
        assert_eq!(
            out.history[0],
            "!! playwright_click error: Provider call timed out after 60s"
        );
        assert_eq!(out.execution_log[0].status, IterationStatus::Error);
        let next_prompt = &h.llm.prompts()[1];
        assert!(next_prompt.contains("timed out after 60s"));
    }

    #[tokio::test]
    async fn test_prompt_window_and_digest() {
        let h = Harness::texts(&[
            "TOOL_CALL: playwright_click | #1",
            "TOOL_CALL: playwright_click | #2",
            "TOOL_CALL: playwright_click | #3",
            "TOOL_CALL: playwright_click | #4",
            "FINAL_ANSWER: ok",
        ]);
        h.run(10).await;
        let prompts = h.llm.prompts();
        assert!(!prompts[0].contains("AVAILABLE TOOLS"));
        assert!(prompts[1].contains("• playwright_click(selector)"));
        // 第 5 轮只看到最近 3 条
        let last = &prompts[4];
        let completed = last.split("ACTIONS COMPLETED:\n").nth(1).unwrap();
        assert_eq!(completed.matches("playwright_click succeeded").count(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_same_iteration() {
        let h = Harness::new(vec![
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::RateLimited("429".into())),
            Ok("FINAL_ANSWER: fine".to_string()),
        ]);
        let out = h.run(5).await;
        assert!(out.success);
        assert_eq!(out.iterations, 1);
        assert_eq!(h.llm.call_count(), 3);
        let warnings = h
            .sink
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, m)| *l == LogLevel::Warning && m.starts_with("Rate limit"))
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_is_fatal() {
        let mut h = Harness::new(vec![Err(LlmError::RateLimited("429".into()))]);
        h.settings.max_rate_limit_retries = 2;
        let out = h.run(5).await;
        assert!(!out.success);
        assert_eq!(out.iterations, 0);
        assert!(out.error.unwrap().starts_with("Rate limit retries exhausted"));
        assert_eq!(h.llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fatal_llm_error_keeps_partial_history() {
        let h = Harness::new(vec![
            Ok("TOOL_CALL: playwright_navigate | https://a.com".to_string()),
            Err(LlmError::Request("500 internal".into())),
        ]);
        let out = h.run(10).await;
        assert!(!out.success);
        assert_eq!(out.result, EARLY_STOP_MESSAGE);
        assert_eq!(out.iterations, 1);
        assert_eq!(out.history, vec!["playwright_navigate succeeded"]);
        assert_eq!(out.error.as_deref(), Some("Decision source failed: 500 internal"));
    }
}
