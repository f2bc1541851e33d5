//! 后台任务：任务记录、并发注册表与生命周期管理

pub mod manager;
pub mod record;
pub mod registry;

pub use manager::{
    HealthReport, IterationLimits, RecordSink, SubmitReceipt, SubmitRequest, TaskError, TaskList, TaskManager,
};
pub use record::{LogEntry, TaskId, TaskRecord, TaskStatus};
pub use registry::TaskRegistry;
