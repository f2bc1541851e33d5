//! 任务注册表（内存版）
//!
//! 整表 RwLock：写者持锁完成整条记录的修改，读者拿到的总是完整快照。
//! update 只修改已存在的键；任务被删除后，运行中循环的后续写入直接丢弃。

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::tasks::{TaskRecord, TaskStatus};

#[derive(Default)]
struct Inner {
    records: HashMap<String, TaskRecord>,
    /// 提交顺序
    order: Vec<String>,
}

/// 任务注册表
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TaskRecord) {
        let mut inner = self.inner.write().await;
        let id = record.task_id.clone();
        if inner.records.insert(id.clone(), record).is_none() {
            inner.order.push(id);
        }
    }

    /// 修改已存在的记录；键不存在时返回 false 且不做任何事
    pub async fn update<F>(&self, task_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(task_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.read().await.records.get(task_id).cloned()
    }

    pub async fn remove(&self, task_id: &str) -> Option<TaskRecord> {
        let mut inner = self.inner.write().await;
        let removed = inner.records.remove(task_id);
        if removed.is_some() {
            inner.order.retain(|id| id != task_id);
        }
        removed
    }

    /// 按提交顺序列出（可按状态过滤），返回（前 limit 条, 过滤后总数）
    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> (Vec<TaskRecord>, usize) {
        let inner = self.inner.read().await;
        let matching: Vec<&TaskRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        let total = matching.len();
        let shown = matching.into_iter().take(limit).cloned().collect();
        (shown, total)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn count_by_status(&self) -> HashMap<TaskStatus, usize> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<TaskStatus, usize> =
            TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for record in inner.records.values() {
            *counts.entry(record.status).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_missing_key_is_dropped() {
        let reg = TaskRegistry::new();
        let rec = TaskRecord::new("g");
        let id = rec.task_id.clone();
        reg.insert(rec).await;
        assert!(reg.remove(&id).await.is_some());
        assert!(!reg.update(&id, |r| r.mark_running()).await);
        assert!(reg.get(&id).await.is_none());
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test]
    async fn test_list_keeps_submission_order_and_filters() {
        let reg = TaskRegistry::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let rec = TaskRecord::new(format!("goal {i}"));
            ids.push(rec.task_id.clone());
            reg.insert(rec).await;
        }
        reg.update(&ids[1], |r| r.mark_running()).await;
        reg.update(&ids[3], |r| r.mark_running()).await;

        let (all, total) = reg.list(None, 2).await;
        assert_eq!(total, 4);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].goal, "goal 0");

        let (running, total) = reg.list(Some(TaskStatus::Running), 50).await;
        assert_eq!(total, 2);
        assert_eq!(running[1].task_id, ids[3]);

        let counts = reg.count_by_status().await;
        assert_eq!(counts[&TaskStatus::Pending], 2);
        assert_eq!(counts[&TaskStatus::Completed], 0);
    }
}
