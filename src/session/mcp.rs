//! MCP 客户端：基于 rmcp，子进程 stdio 传输
//!
//! 握手（initialize + notifications/initialized）失败视为致命错误，由调用方终止进程。
//! 握手与 tools/list 带超时，tools/list 超时后有限重试（分页由 rmcp 的 list_all_tools 完成）；
//! tools/call 不在这里限时也不重试，由 ToolExecutor 统一限时。被放弃的调用会向服务端发送
//! notifications/cancelled。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequest, CallToolResult, CancelledNotificationParam, ClientRequest, Content,
    RawContent, RequestId, ServerResult,
};
use rmcp::service::{Peer, PeerRequestOptions, RunningService};
use rmcp::transport::{IntoTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Value};
use tokio::process::Command;

use crate::session::{ExecutionSession, SessionError, ToolDescriptor};

/// 超时与重试
#[derive(Debug, Clone)]
pub struct McpTimeouts {
    pub handshake: Duration,
    pub request: Duration,
    /// tools/list 超时后的额外尝试次数
    pub max_retries: u32,
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            request: Duration::from_secs(30),
            max_retries: 1,
        }
    }
}

fn join_content(items: &[Content]) -> String {
    items
        .iter()
        .map(|c| match &c.raw {
            RawContent::Text(t) => t.text.clone(),
            _ => "[non-text content]".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 未完成的 tools/call 被丢弃（超时）时通知服务端取消
struct CancelOnDrop {
    peer: Peer<RoleClient>,
    request_id: Option<RequestId>,
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.request_id = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(request_id) = self.request_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let peer = self.peer.clone();
        handle.spawn(async move {
            tracing::warn!(request_id = ?request_id, "cancelling abandoned tools/call");
            let param = CancelledNotificationParam {
                request_id,
                reason: Some("client stopped waiting".to_string()),
            };
            if let Err(e) = peer.notify_cancelled(param).await {
                tracing::debug!(error = %e, "failed to send cancellation");
            }
        });
    }
}

/// MCP 会话：持有 rmcp 客户端服务，drop 时关闭连接（子进程随之结束）
pub struct McpSession {
    service: RunningService<RoleClient, ()>,
    timeouts: McpTimeouts,
    server_name: Option<String>,
}

impl McpSession {
    /// 在任意 rmcp 传输上完成握手
    pub async fn connect<T, E, A>(transport: T, timeouts: McpTimeouts) -> Result<Self, SessionError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = tokio::time::timeout(timeouts.handshake, ().serve(transport))
            .await
            .map_err(|_| SessionError::Timeout {
                method: "initialize".to_string(),
                secs: timeouts.handshake.as_secs(),
            })?
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let server_name = service
            .peer_info()
            .map(|info| info.server_info.name.to_string());
        tracing::info!(server = ?server_name, "MCP session initialized");
        Ok(Self {
            service,
            timeouts,
            server_name,
        })
    }

    /// 启动工具服务进程（stderr 继承）并完成握手
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeouts: McpTimeouts,
    ) -> Result<Self, SessionError> {
        let mut cmd = Command::new(command);
        cmd.args(args).envs(env);
        let transport =
            TokioChildProcess::new(cmd).map_err(|e| SessionError::Spawn(format!("{command}: {e}")))?;
        tracing::info!(command, ?args, "tool server spawned");
        Self::connect(transport, timeouts).await
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    async fn list_once(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let tools = tokio::time::timeout(self.timeouts.request, self.service.list_all_tools())
            .await
            .map_err(|_| SessionError::Timeout {
                method: "tools/list".to_string(),
                secs: self.timeouts.request.as_secs(),
            })??;
        Ok(tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: Value::Object(t.input_schema.as_ref().clone()),
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let mut attempt = 0;
        loop {
            match self.list_once().await {
                Err(e) if e.is_transient() && attempt < self.timeouts.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "tools/list failed, retrying");
                }
                other => return other,
            }
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, SessionError> {
        let params = serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .map_err(|e| SessionError::Protocol(format!("tools/call: {e}")))?;
        let request = ClientRequest::CallToolRequest(CallToolRequest::new(params));
        let peer = self.service.peer();
        let handle = peer
            .send_cancellable_request(request, PeerRequestOptions::no_options())
            .await?;
        let guard = CancelOnDrop {
            peer: peer.clone(),
            request_id: Some(handle.id.clone()),
        };
        let response = handle.await_response().await;
        guard.disarm();

        let result: CallToolResult = match response? {
            ServerResult::CallToolResult(r) => r,
            _ => return Err(SessionError::Protocol("tools/call: unexpected response".to_string())),
        };
        let text = join_content(&result.content);
        if result.is_error.unwrap_or(false) {
            Err(SessionError::ToolReported(text))
        } else {
            Ok(text)
        }
    }
}
