//! Agent 错误类型
//!
//! 分层吸收：工具/会话错误在循环内转为 Tool Result 文本，只有 LLM 请求失败会让本轮被丢弃。

use thiserror::Error;

use crate::llm::LlmError;
use crate::session::SessionError;

/// 编排循环对外暴露的错误（网络、会话、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 原生 tool call 的 arguments 不是合法 JSON 对象，在派发时才报告
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}
