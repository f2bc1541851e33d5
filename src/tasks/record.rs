//! 任务记录：对外可见的任务状态快照
//!
//! 生命周期 pending -> running -> completed | failed；终态之后不再变化。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::react::{IterationRecord, LogLevel, LoopMemory, LoopOutcome};

/// 任务 ID
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 已提交，等待执行
    Pending,
    /// 循环运行中
    Running,
    /// 得到最终答案
    Completed,
    /// 预算耗尽或不可恢复的错误
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

/// 带时间戳的诊断日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: now(),
            level,
            message: message.into(),
        }
    }
}

/// 任务记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub goal: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub iterations_used: Option<u32>,
    pub history: Vec<String>,
    pub execution_log: Vec<IterationRecord>,
    pub logs: Vec<LogEntry>,
}

impl TaskRecord {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            iterations_used: None,
            history: Vec::new(),
            execution_log: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now());
    }

    /// 每轮结束后同步历史与执行记录
    pub fn sync_progress(&mut self, memory: &LoopMemory) {
        self.history = memory.history().to_vec();
        self.execution_log = memory.execution_log().to_vec();
        self.iterations_used = Some(memory.execution_log().len() as u32);
    }

    /// 循环正常返回：成功为 completed，否则 failed
    pub fn finish(&mut self, outcome: LoopOutcome) {
        self.status = if outcome.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.result = Some(outcome.result);
        self.error = outcome.error;
        self.iterations_used = Some(outcome.iterations);
        self.history = outcome.history;
        self.execution_log = outcome.execution_log;
        self.completed_at = Some(now());
    }

    /// 循环未能启动（如提供方不可用）
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now());
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending_with_empty_results() {
        let r = TaskRecord::new("find laptops");
        assert_eq!(r.status, TaskStatus::Pending);
        assert!(r.result.is_none() && r.error.is_none());
        assert!(r.started_at.is_none() && r.completed_at.is_none());
        assert!(r.history.is_empty() && r.logs.is_empty());
        assert!(uuid::Uuid::parse_str(&r.task_id).is_ok());
    }

    #[test]
    fn test_finish_maps_success_flag() {
        let mut r = TaskRecord::new("g");
        r.mark_running();
        r.finish(LoopOutcome {
            success: false,
            result: "Max iterations reached without completing task".into(),
            iterations: 5,
            history: vec!["Invalid response format".into()],
            execution_log: vec![],
            error: None,
        });
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.iterations_used, Some(5));
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn test_status_parse_and_serialize() {
        assert_eq!("running".parse::<TaskStatus>(), Ok(TaskStatus::Running));
        assert!("cancelled".parse::<TaskStatus>().is_err());
        let v = serde_json::to_value(TaskStatus::Completed).unwrap();
        assert_eq!(v, "completed");
    }
}
