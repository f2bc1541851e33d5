//! 认知层：Planner（prompt 与决策解析）、循环记忆、进度事件与编排主循环

pub mod events;
pub mod loop_;
pub mod memory;
pub mod planner;

pub use events::{LogLevel, ProgressSink, TracingSink};
pub use loop_::{run_loop, LoopOutcome, LoopSession, EARLY_STOP_MESSAGE};
pub use memory::{IterationRecord, IterationStatus, LoopMemory};
pub use planner::{parse_decision, Decision, Planner, DEFAULT_SYSTEM_PROMPT, FINAL_ANSWER_MARKER, TOOL_CALL_MARKER};
