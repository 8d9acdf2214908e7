//! Schema Adapter：把执行端声明的 input schema 转成 Chat Completion 的 tools 字段
//!
//! 部分 schema 生成器（pydantic、schemars）会给每个字段附带 "title"，
//! 一些 OpenAI 兼容后端会把它当作非法关键字拒绝；这里在任意深度删除名为 "title" 的键。

use serde_json::Value;

use crate::llm::ChatTool;
use crate::session::ToolDescriptor;

/// 递归删除所有名为 "title" 的 map 键；数组逐项处理，标量原样返回
pub fn strip_titles(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "title")
                .map(|(key, value)| (key.clone(), strip_titles(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_titles).collect()),
        scalar => scalar.clone(),
    }
}

/// 单个工具描述 -> Chat Completion tool（function 形式）
pub fn to_chat_tool(descriptor: &ToolDescriptor) -> ChatTool {
    ChatTool::function(
        &descriptor.name,
        &descriptor.description,
        strip_titles(&descriptor.input_schema),
    )
}

/// 会话内全部工具 -> 请求用的 tools 列表（保持执行端给出的顺序）
pub fn chat_tools(descriptors: &[ToolDescriptor]) -> Vec<ChatTool> {
    descriptors.iter().map(to_chat_tool).collect()
}
