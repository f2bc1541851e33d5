//! 位置参数类型转换
//!
//! 按 ToolDescriptor 的参数声明顺序，把决策中的位置文本值映射为 JSON 参数对象。
//! 多余的位置值忽略；缺失的参数直接省略（由提供方自行报告缺参）。

use serde_json::{Map, Number, Value};

use crate::core::AgentError;
use crate::tools::{ParamKind, ToolCatalog, ToolDescriptor};

/// 布尔参数接受的真值（大小写不敏感），其余一律为 false
const TRUTHY_TOKENS: [&str; 3] = ["true", "1", "yes"];

/// 先在目录中解析工具名，再转换参数；未知工具在转换前即失败
pub fn prepare_call(
    catalog: &ToolCatalog,
    tool_name: &str,
    values: &[String],
) -> Result<Map<String, Value>, AgentError> {
    let descriptor = catalog
        .get(tool_name)
        .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;
    coerce_arguments(descriptor, values)
}

/// 将位置值按 schema 顺序转换为参数对象
pub fn coerce_arguments(
    descriptor: &ToolDescriptor,
    values: &[String],
) -> Result<Map<String, Value>, AgentError> {
    let mut args = Map::new();
    for (param, raw) in descriptor.parameters.iter().zip(values) {
        let value = coerce_value(&param.name, param.kind, raw)?;
        args.insert(param.name.clone(), value);
    }
    Ok(args)
}

fn coerce_value(param: &str, kind: ParamKind, raw: &str) -> Result<Value, AgentError> {
    let mismatch = || AgentError::Coercion {
        param: param.to_string(),
        value: raw.to_string(),
        kind: kind.as_str().to_string(),
    };

    match kind {
        ParamKind::String => Ok(Value::String(raw.to_string())),
        ParamKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch()),
        ParamKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(mismatch),
        ParamKind::Boolean => {
            let token = raw.trim().to_lowercase();
            Ok(Value::Bool(TRUTHY_TOKENS.contains(&token.as_str())))
        }
    }
}
