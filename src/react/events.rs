//! 循环进度事件：诊断日志与每轮快照
//!
//! 循环通过 ProgressSink 推送；任务管理器把它写入 TaskRecord，CLI 则转发到 tracing。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::react::LoopMemory;

/// 诊断日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// 循环进度接收端；每轮结果完整写入后才会开始下一轮
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn log(&self, level: LogLevel, message: &str);

    /// 一轮记录完毕（history / execution_log 已更新）
    async fn iteration_recorded(&self, _memory: &LoopMemory) {}
}

/// 把日志转发到 tracing（CLI 详细模式）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}
