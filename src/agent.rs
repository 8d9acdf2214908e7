//! Agent 组装
//!
//! 按配置一次性构建 Chat Model、Execution Session 与编排循环，显式传给 REPL，不使用全局单例。
//! 执行端启动或握手失败视为致命错误，由 main 直接退出。

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, LlmProvider, SessionKind};
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::memory::ConversationHistory;
use crate::react::{CallFormNormalizer, OrchestrationLoop, ReactEvent};
use crate::session::{ExecutionSession, LocalSession, McpSession};
use crate::tools::{ArgumentSanitizer, EchoTool, ReadFileTool, ToolExecutor, ToolRegistry};

/// 预构建的 Agent 组件：编排循环 + 以 system prompt 开头的空历史
pub struct AgentComponents {
    pub orchestrator: OrchestrationLoop,
    pub history: ConversationHistory,
    /// 与编排循环共享，供退出时读取 token 统计
    pub llm: Arc<dyn LlmClient>,
}

/// 按 [llm] 段创建客户端，统一包一层超时与重试
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let inner: Arc<dyn LlmClient> = match cfg.llm.provider {
        LlmProvider::OpenAi => {
            tracing::info!(base_url = %cfg.llm.base_url, model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                Some(&cfg.llm.base_url),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
            ))
        }
        LlmProvider::Mock => {
            tracing::warn!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    };
    Arc::new(RetryingLlmClient::new(inner, cfg.llm.retry_config()))
}

/// 进程内工具集：echo 与限制在数据目录内的 read_file
pub fn local_registry(cfg: &AppConfig, workspace: &Path) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(ReadFileTool::new(
        workspace,
        &cfg.tools.data_dir,
        cfg.tools.max_read_chars,
    ));
    tools
}

/// 按 [session] 段启动执行端；MCP 模式下完成握手才返回
pub async fn create_session(cfg: &AppConfig) -> Result<Arc<dyn ExecutionSession>, AgentError> {
    match cfg.session.kind {
        SessionKind::Mcp => {
            tracing::info!(command = %cfg.session.command, args = ?cfg.session.args, "Starting MCP tool server");
            let session = McpSession::spawn(
                &cfg.session.command,
                &cfg.session.args,
                &cfg.session.env,
                cfg.session.mcp_timeouts(),
            )
            .await?;
            tracing::info!(server = session.server_name().unwrap_or("unknown"), "MCP session ready");
            Ok(Arc::new(session))
        }
        SessionKind::Local => {
            let workspace = std::env::current_dir()
                .map_err(|e| AgentError::ConfigError(format!("cannot resolve working directory: {}", e)))?;
            tracing::info!(workspace = %workspace.display(), "Using local tool session");
            Ok(Arc::new(LocalSession::new(local_registry(cfg, &workspace))))
        }
    }
}

/// 由给定的 LLM 与执行端组装编排循环，并拉取一次工具清单
pub async fn assemble(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    session: Arc<dyn ExecutionSession>,
    event_tx: Option<&UnboundedSender<ReactEvent>>,
) -> Result<AgentComponents, AgentError> {
    let executor = ToolExecutor::new(session, cfg.tools.tool_timeout_secs);
    let mut orchestrator = OrchestrationLoop::new(
        llm.clone(),
        executor,
        CallFormNormalizer::new(&cfg.tools.code_tool, &cfg.tools.code_argument),
        ArgumentSanitizer::new(&cfg.tools.data_dir),
    )
    .with_max_tool_rounds(cfg.app.max_tool_rounds)
    .with_preview_chars(cfg.app.preview_chars);
    orchestrator.refresh_tools(event_tx).await?;

    Ok(AgentComponents {
        orchestrator,
        history: ConversationHistory::with_system(&cfg.app.system_prompt),
        llm,
    })
}

/// 创建全部 Agent 组件（main 使用）
pub async fn create_agent_components(
    cfg: &AppConfig,
    event_tx: Option<&UnboundedSender<ReactEvent>>,
) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg);
    let session = create_session(cfg).await?;
    assemble(cfg, llm, session, event_tx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSection;
    use crate::memory::Role;

    fn local_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = LlmProvider::Mock;
        cfg.session = SessionSection {
            kind: SessionKind::Local,
            ..SessionSection::default()
        };
        cfg
    }

    #[tokio::test]
    async fn test_local_components_start_with_system_prompt() {
        let cfg = local_config();
        let agent = create_agent_components(&cfg, None).await.unwrap();
        assert_eq!(agent.history.len(), 1);
        assert_eq!(agent.history.messages()[0].role, Role::System);
        assert_eq!(
            agent.history.messages()[0].content,
            "You are a Data Analyst using local tools."
        );
        let names: Vec<&str> = agent
            .orchestrator
            .tools()
            .iter()
            .map(|t| t.function.name.as_str())
            .collect();
        assert_eq!(names, ["echo", "read_file"]);
    }

    #[tokio::test]
    async fn test_mcp_spawn_failure_is_fatal() {
        let mut cfg = AppConfig::default();
        cfg.session.command = "/nonexistent/pilot-tool-server".to_string();
        let err = create_session(&cfg).await.err().unwrap();
        assert!(matches!(err, AgentError::Session(_)));
    }
}
