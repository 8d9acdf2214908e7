//! Chat Completion 请求/响应的 serde 类型
//!
//! 通过 async-openai 的 create_byot 发送，自己掌握 tool_calls / tool 消息的格式，
//! 兼容 LM Studio、llama.cpp、vLLM 等 OpenAI 兼容端点的差异。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{Message, Role};

/// 请求中的 tools 项：{"type": "function", "function": {...}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ChatTool {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ChatTool]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        match m.role {
            Role::System => WireMessage::System {
                content: m.content.clone(),
            },
            Role::User => WireMessage::User {
                content: m.content.clone(),
            },
            Role::Assistant => {
                let tool_calls: Vec<WireToolCall> = m
                    .invocations
                    .iter()
                    .map(|inv| WireToolCall {
                        id: inv.id.clone(),
                        kind: "function",
                        function: WireFunctionCall {
                            name: inv.name.clone(),
                            arguments: inv.arguments.to_json_text(),
                        },
                    })
                    .collect();
                // 只有工具调用时 content 为 null，其余情况保留文本（可能为空串）
                let content = if m.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                WireMessage::Assistant {
                    content,
                    tool_calls,
                }
            }
            Role::Tool => WireMessage::Tool {
                tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
                content: m.content.clone(),
            },
        }
    }
}

pub fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages.iter().map(WireMessage::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseToolCall {
    #[serde(default)]
    pub id: String,
    pub function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
pub struct ResponseFunction {
    pub name: String,
    /// 规范为 JSON 字符串；个别本地服务直接返回对象
    #[serde(default)]
    pub arguments: Value,
}

impl ResponseFunction {
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}
