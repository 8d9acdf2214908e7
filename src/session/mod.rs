//! Execution Session：对外暴露可用工具并按名执行
//!
//! - **mcp**: 子进程 stdio 上的 MCP（rmcp 客户端）
//! - **local**: 进程内 ToolRegistry（离线运行与测试）

pub mod local;
pub mod mcp;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use local::LocalSession;
pub use mcp::{McpSession, McpTimeouts};

/// 工具描述：会话生命周期内不变
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 执行端错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to start tool server: {0}")]
    Spawn(String),

    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("MCP service error: {0}")]
    Service(#[from] rmcp::service::ServiceError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// 工具自身报告的失败（MCP isError）
    #[error("{0}")]
    ToolReported(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl SessionError {
    /// 超时可重试（仅用于幂等请求）
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}

/// 执行端 trait：list_tools / call_tool
#[async_trait]
pub trait ExecutionSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError>;

    /// 按名执行，返回文本结果
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, SessionError>;
}
