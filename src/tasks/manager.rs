//! 任务生命周期管理
//!
//! submit 建立 pending 记录并在后台 tokio 任务中运行 AgentRunner；循环每轮通过 RecordSink
//! 把日志与历史写回注册表，结束时写入终态。每条记录只有它自己的后台任务会写入。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::agent::AgentRunner;
use crate::config::AgentSection;
use crate::react::{LogLevel, LoopMemory, ProgressSink};
use crate::tasks::{LogEntry, TaskId, TaskRecord, TaskRegistry, TaskStatus};

/// 任务接口错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found")]
    NotFound(TaskId),

    #[error("{0}")]
    InvalidRequest(String),
}

/// 提交请求
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SubmitRequest {
    /// 要完成的自动化目标
    pub goal: String,
    /// 迭代预算，默认 15，范围 [5, 30]
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

/// 提交回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

/// 列表结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
    pub showing: usize,
}

impl TaskList {
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            total: 0,
            showing: 0,
        }
    }
}

/// 健康检查
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub llm_configured: bool,
    pub tasks_count: usize,
    pub tasks_by_status: HashMap<TaskStatus, usize>,
}

/// 迭代预算范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationLimits {
    pub default: u32,
    pub min: u32,
    pub max: u32,
}

impl IterationLimits {
    pub fn from_config(agent: &AgentSection) -> Self {
        Self {
            default: agent.max_iterations,
            min: agent.min_iterations,
            max: agent.max_iterations_limit,
        }
    }

    fn resolve(&self, requested: Option<u32>) -> Result<u32, TaskError> {
        let n = requested.unwrap_or(self.default);
        if n < self.min || n > self.max {
            return Err(TaskError::InvalidRequest(format!(
                "max_iterations must be between {} and {}, got {}",
                self.min, self.max, n
            )));
        }
        Ok(n)
    }
}

impl Default for IterationLimits {
    fn default() -> Self {
        Self::from_config(&AgentSection::default())
    }
}

/// 任务管理器
pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    runner: Arc<AgentRunner>,
    limits: IterationLimits,
    /// 并发上限（None 表示不限制）
    permits: Option<Arc<Semaphore>>,
}

impl TaskManager {
    pub fn new(runner: Arc<AgentRunner>, limits: IterationLimits, max_concurrent: Option<usize>) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            runner,
            limits,
            permits: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// 提交目标：立即返回 pending 回执，循环在后台运行
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitReceipt, TaskError> {
        let goal = req.goal.trim();
        if goal.is_empty() {
            return Err(TaskError::InvalidRequest("goal must not be empty".to_string()));
        }
        let max_iterations = self.limits.resolve(req.max_iterations)?;

        let record = TaskRecord::new(goal);
        let task_id = record.task_id.clone();
        self.registry.insert(record).await;
        tracing::info!(task_id = %task_id, max_iterations, "task submitted");

        let registry = Arc::clone(&self.registry);
        let runner = Arc::clone(&self.runner);
        let permits = self.permits.clone();
        let goal = goal.to_string();
        let id = task_id.clone();
        tokio::spawn(async move {
            let _permit = match permits {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };
            // 循环在独立任务中运行：panic 只会变成 JoinError，记录仍能落到终态
            let worker = tokio::spawn(run_task(
                Arc::clone(&registry),
                runner,
                id.clone(),
                goal,
                max_iterations,
            ));
            if let Err(e) = worker.await {
                tracing::error!(task_id = %id, error = %e, "task worker aborted");
                let msg = format!("Task worker aborted: {}", e);
                registry
                    .update(&id, |r| {
                        if !r.status.is_finished() {
                            r.logs.push(LogEntry::new(LogLevel::Error, msg.clone()));
                            r.fail(msg);
                        }
                    })
                    .await;
            }
        });

        Ok(SubmitReceipt {
            message: format!(
                "Task submitted successfully. Check status at /task/{}",
                task_id
            ),
            task_id,
            status: TaskStatus::Pending,
        })
    }

    pub async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.registry
            .get(task_id)
            .await
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> TaskList {
        let (tasks, total) = self.registry.list(status, limit).await;
        TaskList {
            showing: tasks.len(),
            tasks,
            total,
        }
    }

    /// 删除记录；运行中的任务继续跑完，但其后续写入被丢弃
    pub async fn delete(&self, task_id: &str) -> Result<(), TaskError> {
        match self.registry.remove(task_id).await {
            Some(record) => {
                if !record.status.is_finished() {
                    tracing::warn!(task_id = %task_id, "deleted task that is still {}", record.status);
                }
                Ok(())
            }
            None => Err(TaskError::NotFound(task_id.to_string())),
        }
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            llm_configured: self.runner.llm_configured(),
            tasks_count: self.registry.len().await,
            tasks_by_status: self.registry.count_by_status().await,
        }
    }
}

async fn run_task(
    registry: Arc<TaskRegistry>,
    runner: Arc<AgentRunner>,
    task_id: TaskId,
    goal: String,
    max_iterations: u32,
) {
    if !registry.update(&task_id, |r| r.mark_running()).await {
        tracing::debug!(task_id = %task_id, "task deleted before start");
    }

    let sink = RecordSink {
        registry: Arc::clone(&registry),
        task_id: task_id.clone(),
    };
    match runner.run(&goal, max_iterations, &sink).await {
        Ok(outcome) => {
            tracing::info!(
                task_id = %task_id,
                success = outcome.success,
                iterations = outcome.iterations,
                "task finished"
            );
            registry.update(&task_id, |r| r.finish(outcome)).await;
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "task failed to start");
            let msg = e.to_string();
            registry
                .update(&task_id, |r| {
                    r.logs.push(LogEntry::new(LogLevel::Error, msg.clone()));
                    r.fail(msg);
                })
                .await;
        }
    }
}

/// 把循环进度写回任务记录
pub struct RecordSink {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
}

#[async_trait]
impl ProgressSink for RecordSink {
    async fn log(&self, level: LogLevel, message: &str) {
        tracing::debug!(task_id = %self.task_id, "{}", message);
        let entry = LogEntry::new(level, message);
        self.registry
            .update(&self.task_id, |r| r.logs.push(entry))
            .await;
    }

    async fn iteration_recorded(&self, memory: &LoopMemory) {
        self.registry
            .update(&self.task_id, |r| r.sync_progress(memory))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::LoopSettings;
    use crate::llm::{LlmClient, LlmError, ScriptedLlmClient};
    use crate::tools::{MockProviderFactory, ProviderError};

    fn manager_with(llm: Arc<dyn LlmClient>, factory: MockProviderFactory) -> TaskManager {
        let runner = AgentRunner::new(
            llm,
            Arc::new(factory),
            LoopSettings::default(),
            "SYS",
            Duration::from_secs(5),
        );
        TaskManager::new(Arc::new(runner), IterationLimits::default(), None)
    }

    fn manager(replies: &[&str]) -> TaskManager {
        manager_with(
            Arc::new(ScriptedLlmClient::from_texts(replies.iter().copied())),
            MockProviderFactory::with_browser_tools(),
        )
    }

    fn request(goal: &str, max_iterations: Option<u32>) -> SubmitRequest {
        SubmitRequest {
            goal: goal.to_string(),
            max_iterations,
        }
    }

    async fn wait_finished(m: &TaskManager, id: &str) -> TaskRecord {
        for _ in 0..200 {
            let r = m.get(id).await.unwrap();
            if r.status.is_finished() {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", id);
    }

    /// 每次调用前等待一段时间的决策源
    struct SlowLlm(Duration);

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, LlmError> {
            tokio::time::sleep(self.0).await;
            Ok("still thinking".to_string())
        }
    }

    /// 调用即 panic 的决策源
    struct PanickingLlm;

    #[async_trait]
    impl LlmClient for PanickingLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, LlmError> {
            panic!("decision source crashed");
        }
    }

    #[tokio::test]
    async fn test_submit_returns_pending_then_completes() {
        let m = manager(&["TOOL_CALL: playwright_navigate | https://a.com", "FINAL_ANSWER: done"]);
        let receipt = m.submit(request("open a.com", None)).await.unwrap();
        assert_eq!(receipt.status, TaskStatus::Pending);
        assert!(receipt.message.ends_with(&receipt.task_id));

        let r = wait_finished(&m, &receipt.task_id).await;
        assert_eq!(r.status, TaskStatus::Completed);
        assert_eq!(r.result.as_deref(), Some("done"));
        assert_eq!(r.iterations_used, Some(2));
        assert_eq!(r.history, vec!["playwright_navigate succeeded"]);
        assert!(r.started_at.is_some() && r.completed_at.is_some());
        assert!(r.logs.iter().any(|l| l.message == "Iteration 1/15"));
    }

    #[tokio::test]
    async fn test_polling_finished_task_is_idempotent() {
        let m = manager(&["FINAL_ANSWER: 1"]);
        let id = m.submit(request("g", None)).await.unwrap().task_id;
        let first = wait_finished(&m, &id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = m.get(&id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_budget_of_five_fails_with_five_records() {
        let m = manager(&["no idea"]);
        let id = m.submit(request("g", Some(5))).await.unwrap().task_id;
        let r = wait_finished(&m, &id).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.execution_log.len(), 5);
        assert_eq!(r.iterations_used, Some(5));
        assert!(r.error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let m = manager(&[]);
        assert!(matches!(
            m.submit(request("g", Some(4))).await,
            Err(TaskError::InvalidRequest(_))
        ));
        assert!(matches!(
            m.submit(request("g", Some(31))).await,
            Err(TaskError::InvalidRequest(_))
        ));
        assert!(matches!(
            m.submit(request("   ", None)).await,
            Err(TaskError::InvalidRequest(_))
        ));
        assert_eq!(m.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_then_poll_is_not_found() {
        let m = manager(&["FINAL_ANSWER: x"]);
        let id = m.submit(request("g", None)).await.unwrap().task_id;
        wait_finished(&m, &id).await;
        m.delete(&id).await.unwrap();
        assert_eq!(m.get(&id).await, Err(TaskError::NotFound(id.clone())));
        assert_eq!(m.delete(&id).await, Err(TaskError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_delete_while_running_drops_later_writes() {
        let factory = MockProviderFactory::with_browser_tools();
        let m = manager_with(Arc::new(SlowLlm(Duration::from_millis(20))), factory.clone());
        let id = m.submit(request("g", Some(5))).await.unwrap().task_id;

        for _ in 0..100 {
            if m.get(&id).await.unwrap().status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        m.delete(&id).await.unwrap();

        // 循环仍会跑完并关闭会话，但不会重新创建记录
        for _ in 0..200 {
            if factory.closed_sessions() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(factory.closed_sessions(), 1);
        assert!(matches!(m.get(&id).await, Err(TaskError::NotFound(_))));
        assert_eq!(m.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_provider_unavailable_marks_failed() {
        let m = manager_with(
            Arc::new(ScriptedLlmClient::default()),
            MockProviderFactory::failing(ProviderError::Spawn("npx missing".into())),
        );
        let id = m.submit(request("g", None)).await.unwrap().task_id;
        let r = wait_finished(&m, &id).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.error.unwrap().contains("npx missing"));
        assert!(r.execution_log.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_loop_marks_failed() {
        let m = manager_with(Arc::new(PanickingLlm), MockProviderFactory::with_browser_tools());
        let id = m.submit(request("g", None)).await.unwrap().task_id;
        let r = wait_finished(&m, &id).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.error.unwrap().starts_with("Task worker aborted"));
        assert!(r.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_and_health() {
        let m = manager(&["FINAL_ANSWER: ok"]);
        let a = m.submit(request("a", None)).await.unwrap().task_id;
        let b = m.submit(request("b", None)).await.unwrap().task_id;
        wait_finished(&m, &a).await;
        wait_finished(&m, &b).await;

        let list = m.list(Some(TaskStatus::Completed), 1).await;
        assert_eq!(list.total, 2);
        assert_eq!(list.showing, 1);
        assert_eq!(list.tasks[0].task_id, a);

        let health = m.health().await;
        assert_eq!(health.tasks_count, 2);
        assert_eq!(health.tasks_by_status[&TaskStatus::Completed], 2);
        assert_eq!(health.tasks_by_status[&TaskStatus::Running], 0);
        assert!(health.llm_configured);
    }
}
