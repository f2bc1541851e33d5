//! LLM 层：决策源抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{ScriptedLlmClient, ScriptedReply};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError};
