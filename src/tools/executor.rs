//! 工具执行器
//!
//! 持有 ExecutionSession 与全局超时，execute(tool_name, args) 在超时内调用 session.call_tool，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed / Session）；每次调用输出结构化审计日志（JSON）。
//! 失败不重试：工具可能有副作用，是否再调一次由模型看到错误文本后决定。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::session::{ExecutionSession, SessionError, ToolDescriptor};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    session: Arc<dyn ExecutionSession>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(session: Arc<dyn ExecutionSession>, timeout_secs: u64) -> Self {
        Self {
            session,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        Ok(self.session.list_tools().await?)
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具自报失败转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.session.call_tool(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(SessionError::ToolReported(text))) => Err(AgentError::ToolExecutionFailed(text)),
            Ok(Err(e)) => Err(AgentError::Session(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
