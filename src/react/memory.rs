//! 循环记忆：历史条目与执行日志
//!
//! history 是每轮结果的简短摘要，只有最近 window 条回填到 prompt；
//! execution_log 每轮一条完整记录，不截断，供事后查看。

use serde::{Deserialize, Serialize};

/// 单轮结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Success,
    Failed,
    Error,
}

/// 单轮执行记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 从 1 开始
    pub iteration: u32,
    pub response: String,
    pub status: IterationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IterationRecord {
    pub fn success(iteration: u32, response: &str, result: impl Into<String>) -> Self {
        Self {
            iteration,
            response: response.to_string(),
            status: IterationStatus::Success,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(iteration: u32, response: &str, result: impl Into<String>) -> Self {
        Self {
            iteration,
            response: response.to_string(),
            status: IterationStatus::Failed,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(iteration: u32, response: &str, error: impl Into<String>) -> Self {
        Self {
            iteration,
            response: response.to_string(),
            status: IterationStatus::Error,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// 单个任务的历史与执行日志（仅追加）
#[derive(Debug, Clone, Default)]
pub struct LoopMemory {
    history: Vec<String>,
    execution_log: Vec<IterationRecord>,
    window: usize,
}

impl LoopMemory {
    pub fn new(window: usize) -> Self {
        Self {
            history: Vec::new(),
            execution_log: Vec::new(),
            window,
        }
    }

    /// 记录一轮：历史摘要（可无）+ 执行记录
    pub fn record(&mut self, history_entry: Option<String>, record: IterationRecord) {
        if let Some(entry) = history_entry {
            self.history.push(entry);
        }
        self.execution_log.push(record);
    }

    /// 最近 window 条历史
    pub fn recent(&self) -> &[String] {
        let start = self.history.len().saturating_sub(self.window);
        &self.history[start..]
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn execution_log(&self) -> &[IterationRecord] {
        &self.execution_log
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<IterationRecord>) {
        (self.history, self.execution_log)
    }
}

/// 按字符截断（不在 UTF-8 字符中间切断）
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
