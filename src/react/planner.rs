//! Planner：prompt 拼装与决策解析
//!
//! 每轮调用决策源得到一段自由文本；parse_decision 从中提取唯一的决策：
//! `FINAL_ANSWER: <text>` 或 `TOOL_CALL: <tool> | <arg> | <arg>`，两者都没有则为 Unparseable。

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};

pub const FINAL_ANSWER_MARKER: &str = "FINAL_ANSWER:";
pub const TOOL_CALL_MARKER: &str = "TOOL_CALL:";
const ARG_DELIMITER: char = '|';

/// 内置 system prompt（可由 [agent].system_prompt_path 覆盖）
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a web automation assistant driving a real browser through tools.

Answer with exactly ONE line in one of these forms:
TOOL_CALL: tool_name | arg1 | arg2
FINAL_ANSWER: the answer for the user

Rules:
- Act immediately; never ask for clarification.
- Arguments are positional, in the order the tool declares them, separated by |.
- playwright_evaluate takes a single JavaScript expression; everything after the first | is the script.
- Use playwright_evaluate to inspect the page, extract text and scroll.
- Lines starting with !! are failed actions; do not repeat them, try a different selector or approach.
- As soon as the results contain the requested data, return FINAL_ANSWER.";

/// 单次决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    ToolInvocation {
        tool_name: String,
        positional_values: Vec<String>,
    },
    FinalAnswer {
        text: String,
    },
    Unparseable,
}

/// 解析决策源输出
///
/// 最终答案优先于工具调用；只取第一条 TOOL_CALL 行。
/// script_tool 的参数不再按管道符切分（脚本本身可能含 `||`）。
pub fn parse_decision(output: &str, script_tool: &str) -> Decision {
    if output.contains(FINAL_ANSWER_MARKER) {
        return output
            .lines()
            .find_map(|line| line.split_once(FINAL_ANSWER_MARKER))
            .map(|(_, answer)| Decision::FinalAnswer {
                text: answer.trim().to_string(),
            })
            .unwrap_or(Decision::Unparseable);
    }

    if output.contains(TOOL_CALL_MARKER) {
        let Some(line) = output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(TOOL_CALL_MARKER))
        else {
            return Decision::Unparseable;
        };
        let body = line[TOOL_CALL_MARKER.len()..].trim();

        let (tool_name, positional_values) = match body.split_once(ARG_DELIMITER) {
            Some((name, rest)) => {
                let name = name.trim();
                let rest = rest.trim();
                let values = if name == script_tool {
                    vec![rest.to_string()]
                } else {
                    rest.split(ARG_DELIMITER).map(|v| v.trim().to_string()).collect()
                };
                (name, values)
            }
            None => (body, Vec::new()),
        };

        if tool_name.is_empty() {
            return Decision::Unparseable;
        }
        return Decision::ToolInvocation {
            tool_name: tool_name.to_string(),
            positional_values,
        };
    }

    Decision::Unparseable
}

/// Planner：持有决策源与 system prompt，负责拼装每轮 prompt 并调用决策源
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    temperature: f32,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            temperature,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 第一轮：只给目标
    pub fn first_prompt(&self, goal: &str) -> String {
        format!(
            "{}\n\nGOAL: {}\nReturn the FIRST tool call.",
            self.system_prompt, goal
        )
    }

    /// 后续轮：工具摘要 + 目标 + 最近历史
    pub fn next_prompt(&self, tools_digest: &str, goal: &str, recent_history: &[String]) -> String {
        format!(
            "{}\n\nAVAILABLE TOOLS:\n{}\n\nGOAL: {}\n\nACTIONS COMPLETED:\n{}\n\n\
             If the results above already contain the data the goal asks for, return FINAL_ANSWER now \
             instead of retrying.\n\nReturn the NEXT tool call or FINAL_ANSWER.",
            self.system_prompt,
            tools_digest,
            goal,
            recent_history.join("\n")
        )
    }

    pub async fn plan(&self, prompt: &str) -> Result<String, LlmError> {
        self.llm
            .generate(prompt, self.temperature)
            .await
            .map(|text| text.trim().to_string())
    }
}
