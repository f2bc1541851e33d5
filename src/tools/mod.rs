//! 工具层：工具描述目录、位置参数转换、能力提供方会话（MCP / Mock）与执行器

pub mod coercion;
pub mod descriptor;
pub mod executor;
pub mod mcp;
pub mod mock;
pub mod provider;

pub use coercion::{coerce_arguments, prepare_call};
pub use descriptor::{ParamKind, ParamSpec, ToolCatalog, ToolDescriptor};
pub use executor::ToolExecutor;
pub use mcp::{McpProviderFactory, McpSession};
pub use mock::{browser_tools, MockProvider, MockProviderFactory};
pub use provider::{CapabilityProvider, ProviderError, ProviderFactory, ToolContent, ToolResult};
