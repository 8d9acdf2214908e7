//! Tool Invocation / Tool Result 值类型
//!
//! Invocation 一经 Normalizer 生成即不可变；原生 tool call 的参数解析失败不在归一化阶段报错，
//! 而是以 Arguments::Malformed 保存原文，派发时才作为该次调用的结果文本返回给模型。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 调用参数：解析成功的 JSON 对象，或保留原文的解析失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Arguments {
    Parsed { value: Map<String, Value> },
    Malformed { raw: String, reason: String },
}

impl Arguments {
    pub fn empty() -> Self {
        Arguments::Parsed { value: Map::new() }
    }

    pub fn from_map(value: Map<String, Value>) -> Self {
        Arguments::Parsed { value }
    }

    /// 解析后端返回的 JSON 字符串；空串视为无参数，非对象视为格式错误
    pub fn from_json_text(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::empty();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value).unwrap_or_else(|reason| Arguments::Malformed {
                raw: raw.to_string(),
                reason,
            }),
            Err(e) => Arguments::Malformed {
                raw: raw.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// 已是结构化值（如内联 JSON 数组元素）：对象直接使用，字符串再解析一次，null 视为空
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            Value::Null => Ok(Self::empty()),
            Value::String(s) => match Self::from_json_text(&s) {
                Arguments::Malformed { reason, .. } => Err(reason),
                parsed => Ok(parsed),
            },
            other => Err(format!("arguments must be a JSON object, got {}", json_kind(&other))),
        }
    }

    /// 派发前取出参数对象；Malformed 返回原因
    pub fn parsed(&self) -> Result<&Map<String, Value>, &str> {
        match self {
            Arguments::Parsed { value } => Ok(value),
            Arguments::Malformed { reason, .. } => Err(reason),
        }
    }

    /// 回写给模型的参数文本：Malformed 原样返回，保证模型看到自己的输出
    pub fn to_json_text(&self) -> String {
        match self {
            Arguments::Parsed { value } => Value::Object(value.clone()).to_string(),
            Arguments::Malformed { raw, .. } => raw.clone(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 一次工具调用：id 在单轮内唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// 合成 id（内联 / 围栏策略）：call_0, call_1, ...
    pub fn positional_id(index: usize) -> String {
        format!("call_{index}")
    }
}

/// 工具执行结果，按 invocation_id 配对
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub invocation_id: String,
    pub text: String,
}
