//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__AGENT__MAX_ITERATIONS=20`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [llm] 段：决策源（OpenAI 兼容端点，默认指向 Gemini）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 读取 API Key 的环境变量名；未设置时回退到 OPENAI_API_KEY
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmSection {
    /// 按 api_key_env → OPENAI_API_KEY 顺序查找 API Key（空串视为未配置）
    pub fn api_key(&self) -> Option<String> {
        [self.api_key_env.as_str(), "OPENAI_API_KEY"]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|v| !v.trim().is_empty())
    }
}

/// [agent] 段：迭代预算、历史窗口、限流退避
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// 提交接口允许的最小迭代数
    #[serde(default = "default_min_iterations")]
    pub min_iterations: u32,
    /// 提交接口允许的最大迭代数
    #[serde(default = "default_max_iterations_limit")]
    pub max_iterations_limit: u32,
    /// 回填到 prompt 的最近历史条数
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// 脚本求值工具名：其参数不按管道符切分
    #[serde(default = "default_script_tool")]
    pub script_tool: String,
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
    /// 单次迭代内限流重试上限
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    /// 单个任务的墙钟时间上限（秒）
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,
    /// 自定义 system prompt 文件；未设置或读取失败时使用内置 prompt
    pub system_prompt_path: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_min_iterations() -> u32 {
    5
}

fn default_max_iterations_limit() -> u32 {
    30
}

fn default_history_window() -> usize {
    3
}

fn default_script_tool() -> String {
    "playwright_evaluate".to_string()
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_max_rate_limit_retries() -> u32 {
    6
}

fn default_max_wall_clock_secs() -> u64 {
    900
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            min_iterations: default_min_iterations(),
            max_iterations_limit: default_max_iterations_limit(),
            history_window: default_history_window(),
            script_tool: default_script_tool(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    /// 读取 system prompt：配置文件优先，否则使用内置 prompt（已配置路径但不可用时告警）
    pub fn system_prompt(&self) -> String {
        let Some(path) = self.system_prompt_path.as_ref() else {
            return crate::react::DEFAULT_SYSTEM_PROMPT.to_string();
        };
        match std::fs::read_to_string(path) {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "System prompt file is empty, using built-in prompt");
                crate::react::DEFAULT_SYSTEM_PROMPT.to_string()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read system prompt file, using built-in prompt");
                crate::react::DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }
}

/// [provider] 段：能力提供方（MCP Server）启动命令与超时
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_provider_command")]
    pub command: String,
    #[serde(default = "default_provider_args")]
    pub args: Vec<String>,
    /// 子进程环境变量，`KEY=VALUE` 列表（config 会把表的键转成小写，列表元素原样保留）
    #[serde(default = "default_provider_env")]
    pub env: Vec<String>,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_provider_command() -> String {
    "npx".to_string()
}

fn default_provider_args() -> Vec<String> {
    vec!["-y".into(), "@executeautomation/playwright-mcp-server".into()]
}

fn default_provider_env() -> Vec<String> {
    vec!["NODE_ENV=production".to_string()]
}

fn default_init_timeout_secs() -> u64 {
    15
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            command: default_provider_command(),
            args: default_provider_args(),
            env: default_provider_env(),
            init_timeout_secs: default_init_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ProviderSection {
    /// 按首个 `=` 拆分 env 条目；没有 `=` 或键为空的条目跳过
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .filter_map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Some((key.trim().to_string(), value.to_string()))
                }
                _ => {
                    tracing::warn!(entry = %entry, "Ignoring provider env entry without KEY=VALUE");
                    None
                }
            })
            .collect()
    }
}

/// [server] 段：HTTP 提交接口
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 同时运行的任务上限；未设置时不限
    pub max_concurrent_tasks: Option<usize>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_tasks: None,
        }
    }
}

/// 循环运行参数（由 [agent] 段换算为 Duration 等运行期类型）
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub history_window: usize,
    pub script_tool: String,
    pub temperature: f32,
    pub rate_limit_backoff: Duration,
    pub max_rate_limit_retries: u32,
    pub max_wall_clock: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        AppConfig::default().loop_settings()
    }
}

impl AppConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            history_window: self.agent.history_window.max(1),
            script_tool: self.agent.script_tool.clone(),
            temperature: self.llm.temperature,
            rate_limit_backoff: Duration::from_secs(self.agent.rate_limit_backoff_secs),
            max_rate_limit_retries: self.agent.max_rate_limit_retries,
            max_wall_clock: Duration::from_secs(self.agent.max_wall_clock_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_behaviour() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 15);
        assert_eq!(cfg.agent.min_iterations, 5);
        assert_eq!(cfg.agent.max_iterations_limit, 30);
        assert_eq!(cfg.agent.history_window, 3);
        assert_eq!(cfg.agent.script_tool, "playwright_evaluate");
        assert_eq!(cfg.agent.rate_limit_backoff_secs, 10);
        assert_eq!(cfg.provider.command, "npx");
        assert_eq!(
            cfg.provider.env_pairs(),
            vec![("NODE_ENV".to_string(), "production".to_string())]
        );
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn test_loop_settings_conversion() {
        let mut cfg = AppConfig::default();
        cfg.agent.history_window = 0;
        cfg.agent.rate_limit_backoff_secs = 2;
        let s = cfg.loop_settings();
        assert_eq!(s.history_window, 1);
        assert_eq!(s.rate_limit_backoff, Duration::from_secs(2));
        assert!((s.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_iterations = 20\nscript_tool = \"js_eval\"\n\n[provider]\ncommand = \"node\"\nargs = [\"server.js\"]\n"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.agent.script_tool, "js_eval");
        assert_eq!(cfg.agent.history_window, 3);
        assert_eq!(cfg.provider.command, "node");
        assert_eq!(cfg.provider.args, vec!["server.js".to_string()]);
    }

    #[test]
    fn test_provider_env_keeps_key_case() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[provider]\nenv = [\"DEBUG_MODE=1\", \"PLAYWRIGHT_BROWSERS_PATH=/opt/pw=cache\", \"broken\"]\n"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(
            cfg.provider.env_pairs(),
            vec![
                ("DEBUG_MODE".to_string(), "1".to_string()),
                ("PLAYWRIGHT_BROWSERS_PATH".to_string(), "/opt/pw=cache".to_string()),
            ]
        );
    }

    #[test]
    fn test_system_prompt_falls_back_to_builtin() {
        let mut section = AgentSection::default();
        assert_eq!(section.system_prompt(), crate::react::DEFAULT_SYSTEM_PROMPT);
        section.system_prompt_path = Some(PathBuf::from("/nonexistent/prompt.md"));
        assert_eq!(section.system_prompt(), crate::react::DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_system_prompt_file_and_empty_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "You drive a browser.").unwrap();
        let mut section = AgentSection::default();
        section.system_prompt_path = Some(file.path().to_path_buf());
        assert_eq!(section.system_prompt(), "You drive a browser.");

        let empty = tempfile::NamedTempFile::new().unwrap();
        section.system_prompt_path = Some(empty.path().to_path_buf());
        assert_eq!(section.system_prompt(), crate::react::DEFAULT_SYSTEM_PROMPT);
    }
}
