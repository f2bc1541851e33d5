//! bee-pilot：由 LLM 驱动的浏览器自动化编排
//!
//! 模块划分：
//! - **agent**: 单任务运行时（打开提供方会话、跑编排循环、保证关闭会话）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复策略
//! - **llm**: 决策源抽象与实现（OpenAI 兼容 / Mock）
//! - **react**: Planner、循环记忆、编排主循环
//! - **tasks**: 后台任务记录、注册表与生命周期管理
//! - **tools**: 工具目录、参数转换、能力提供方（MCP / Mock）与执行器
//! - **api**: HTTP 提交接口（feature `web`）

pub mod agent;
#[cfg(feature = "web")]
pub mod api;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod tasks;
pub mod tools;
