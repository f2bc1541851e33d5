//! 工具描述目录
//!
//! 将能力提供方公布的工具（name + inputSchema）归一化为 ToolDescriptor：
//! 参数按 schema 声明顺序保存，记录原始类型与是否必填。
//! ToolCatalog 在任务开始时取得一次，之后只读共享；digest 渲染一次并在每轮 prompt 中复用。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// 参数的原始类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    /// 解析 JSON Schema 的 type 字段；未知或缺失时按 string 处理
    pub fn from_schema_type(ty: Option<&str>) -> Self {
        match ty {
            Some("integer") => ParamKind::Integer,
            Some("number") => ParamKind::Number,
            Some("boolean") => ParamKind::Boolean,
            _ => ParamKind::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

/// 工具描述：名称 + 有序参数表
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, parameters: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// 从 MCP 风格的 inputSchema（{"properties": {...}, "required": [...]}）构建
    ///
    /// properties 的迭代顺序即位置参数顺序（依赖 serde_json 的 preserve_order）。
    pub fn from_input_schema(name: impl Into<String>, schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let parameters = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(param, info)| ParamSpec {
                        name: param.clone(),
                        kind: ParamKind::from_schema_type(info.get("type").and_then(|t| t.as_str())),
                        required: required.contains(&param.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self::new(name, parameters)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// 渲染为 `• name(p1, p2)`；无必填参数时为 `• name(none)`
    pub fn summary_line(&self) -> String {
        let params: Vec<&str> = self.required_params().map(|p| p.name.as_str()).collect();
        let params = if params.is_empty() {
            "none".to_string()
        } else {
            params.join(", ")
        };
        format!("• {}({})", self.name, params)
    }
}

/// 单个任务内共享的工具目录（只读）
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Arc<[ToolDescriptor]>,
    digest: Arc<str>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let digest = tools
            .iter()
            .map(ToolDescriptor::summary_line)
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            tools: tools.into(),
            digest: digest.into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// 人类可读的工具摘要（每行一个工具），整个任务内复用
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
