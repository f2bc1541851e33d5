//! MCP 能力提供方：通过 stdio 上的 JSON-RPC 2.0 与子进程通信
//!
//! 每个任务启动一个独立子进程会话（initialize → notifications/initialized → tools/list / tools/call），
//! 任务结束时 close() 终止子进程并回收；kill_on_drop 兜底。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderSection;
use crate::tools::{CapabilityProvider, ProviderError, ProviderFactory, ToolDescriptor, ToolResult};

/// stderr 缓冲上限（字符），用于初始化失败时附带诊断信息
const STDERR_CAPTURE_LIMIT: usize = 2000;

#[derive(Serialize, Debug, Clone)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
struct JsonRpcResponse {
    /// 服务端主动通知没有 id
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
struct McpTool {
    name: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// 单个 MCP 子进程会话
pub struct McpSession {
    name: String,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: PendingMap,
    tx_req: mpsc::Sender<String>,
    stderr: Arc<Mutex<String>>,
    shutdown: CancellationToken,
    call_timeout: Duration,
}

impl McpSession {
    /// 启动子进程并完成初始化握手；失败时子进程被终止
    pub async fn open(cfg: &ProviderSection) -> Result<Self, ProviderError> {
        let name = format!("{} {}", cfg.command, cfg.args.join(" "));
        info!("Starting MCP server: {}", name);

        let mut child = Command::new(&cfg.command)
            .args(&cfg.args)
            .envs(cfg.env_pairs())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Spawn(format!("{}: {}", cfg.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Spawn("failed to open MCP stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Spawn("failed to open MCP stdout".to_string()))?;
        let stderr_pipe = child.stderr.take();

        let (tx_req, mut rx_req) = mpsc::channel::<String>(100);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let shutdown = CancellationToken::new();

        // 写端：串行写入 stdin，每条一行
        let writer_stop = shutdown.clone();
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            loop {
                let msg = tokio::select! {
                    _ = writer_stop.cancelled() => break,
                    msg = rx_req.recv() => match msg {
                        Some(m) => m,
                        None => break,
                    },
                };
                debug!("MCP TX: {}", msg);
                if let Err(e) = writer.write_all(format!("{}\n", msg).as_bytes()).await {
                    warn!("Failed to write to MCP stdin: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    warn!("Failed to flush MCP stdin: {}", e);
                    break;
                }
            }
        });

        // 读端：按 id 分发响应；无法解析的行只记日志（部分服务端会输出非 JSON-RPC 内容）
        let reader_pending = pending.clone();
        let reader_stop = shutdown.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = reader_stop.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => match serde_json::from_str::<JsonRpcResponse>(&line) {
                        Ok(resp) => {
                            if let Some(id) = resp.id {
                                if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                    let _ = tx.send(resp);
                                }
                            }
                        }
                        Err(_) => debug!("Unparsed MCP RX: {}", line),
                    },
                    Ok(None) | Err(_) => break,
                }
            }
            // 丢弃所有等待中的请求，调用方收到 Closed
            reader_pending.lock().await.clear();
        });

        if let Some(pipe) = stderr_pipe {
            let stderr_log = stderr.clone();
            let stderr_stop = shutdown.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                loop {
                    let line = tokio::select! {
                        _ = stderr_stop.cancelled() => break,
                        line = lines.next_line() => line,
                    };
                    let Ok(Some(line)) = line else { break };
                    let mut s = stderr_log.lock().await;
                    if s.len() < STDERR_CAPTURE_LIMIT {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("MCP STDERR: {}", line);
                }
            });
        }

        let session = Self {
            name,
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending,
            tx_req,
            stderr,
            shutdown,
            call_timeout: Duration::from_secs(cfg.tool_timeout_secs),
        };

        let init = timeout(Duration::from_secs(cfg.init_timeout_secs), session.initialize()).await;
        let failure = match init {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}s", cfg.init_timeout_secs)),
        };
        if let Some(reason) = failure {
            let stderr_log = session.stderr.lock().await.clone();
            if let Err(e) = session.close().await {
                warn!("Failed to release MCP server after init failure: {}", e);
            }
            return Err(ProviderError::Initialize(format!(
                "{}. Stderr: {}",
                reason,
                stderr_log.trim()
            )));
        }

        info!("MCP server [{}] initialized", session.name);
        Ok(session)
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let req_str = serde_json::to_string(&req).map_err(|e| ProviderError::Rpc(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.tx_req.send(req_str).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ProviderError::Closed);
        }

        let resp = match timeout(self.call_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(ProviderError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ProviderError::Timeout(self.call_timeout.as_secs()));
            }
        };

        if let Some(error) = resp.error {
            return Err(ProviderError::Rpc(error.to_string()));
        }
        resp.result
            .ok_or_else(|| ProviderError::Rpc(format!("missing result for {}", method)))
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let resp = self.call("initialize", Some(params)).await?;
        debug!("MCP initialized: {}", resp);

        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        })
        .to_string();
        self.tx_req.send(notif).await.map_err(|_| ProviderError::Closed)
    }
}

#[async_trait]
impl CapabilityProvider for McpSession {
    async fn list_capabilities(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.call("tools/list", params).await?;
            if let Some(arr) = result.get("tools").and_then(|t| t.as_array()) {
                for raw in arr {
                    match serde_json::from_value::<McpTool>(raw.clone()) {
                        Ok(t) => tools.push(ToolDescriptor::from_input_schema(t.name, &t.input_schema)),
                        Err(e) => warn!("Skipping malformed MCP tool entry: {}", e),
                    }
                }
            }
            cursor = result
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult, ProviderError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": Value::Object(arguments)
        });
        let result = self.call("tools/call", Some(params)).await?;
        Ok(ToolResult::from_mcp_result(result))
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.shutdown.cancel();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            child
                .kill()
                .await
                .map_err(|e| ProviderError::Io(format!("failed to stop MCP server: {}", e)))?;
            debug!("MCP server [{}] stopped", self.name);
        }
        Ok(())
    }
}

/// 按 [provider] 配置为每个任务启动一个 MCP 会话
#[derive(Debug, Clone)]
pub struct McpProviderFactory {
    config: ProviderSection,
}

impl McpProviderFactory {
    pub fn new(config: ProviderSection) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProviderFactory for McpProviderFactory {
    async fn open(&self) -> Result<Box<dyn CapabilityProvider>, ProviderError> {
        Ok(Box::new(McpSession::open(&self.config).await?))
    }
}
