//! 编排主循环
//!
//! 用户输入 -> 请求模型（带 tools）-> Normalizer 归一 ->
//! 若为调用则逐个 Sanitize + 执行并写回 tool 消息，再追问模型 -> 直到最终回复或达到轮数上限。
//! 工具调用严格串行；工具失败转为 "Error: ..." 文本交给模型，只有模型请求失败才让本轮被丢弃。
//! 可选 event_tx：向 REPL 推送 Thinking / ToolCall / Observation / Message 等事件。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::AgentError;
use crate::llm::{AssistantTurn, ChatTool, LlmClient};
use crate::memory::{ConversationHistory, Message, StagedTurn};
use crate::react::normalizer::{CallFormNormalizer, RecognitionOutcome};
use crate::react::ReactEvent;
use crate::tools::{chat_tools, ArgumentSanitizer, ToolExecutor, ToolInvocation, ToolResult};

/// 默认最大工具轮数
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
/// Observation 预览最大字符数
pub const DEFAULT_PREVIEW_CHARS: usize = 200;
/// 结束命令
pub const EXIT_COMMAND: &str = "exit";

/// 一次用户输入的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 收到 exit，循环结束
    Exit,
    /// 本轮最终回复
    Answer(String),
}

fn send_event(tx: Option<&UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 按字符截断，超出时追加 "..."
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

pub fn is_exit(input: &str) -> bool {
    input.trim() == EXIT_COMMAND
}

/// 编排循环：持有模型、执行器与归一化/清洗组件，历史由调用方持有并按轮传入
pub struct OrchestrationLoop {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    normalizer: CallFormNormalizer,
    sanitizer: ArgumentSanitizer,
    tools: Vec<ChatTool>,
    max_tool_rounds: usize,
    preview_chars: usize,
}

impl OrchestrationLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        normalizer: CallFormNormalizer,
        sanitizer: ArgumentSanitizer,
    ) -> Self {
        Self {
            llm,
            executor,
            normalizer,
            sanitizer,
            tools: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    /// 至少 1 轮
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ChatTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &[ChatTool] {
        &self.tools
    }

    /// 从执行端重新拉取工具清单并经 Schema Adapter 转换，返回工具名
    pub async fn refresh_tools(
        &mut self,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<Vec<String>, AgentError> {
        let descriptors = self.executor.list_tools().await?;
        self.tools = chat_tools(&descriptors);
        let names: Vec<String> = descriptors.into_iter().map(|d| d.name).collect();
        tracing::info!(count = names.len(), tools = ?names, "tools loaded");
        send_event(event_tx, ReactEvent::ToolsReady { tools: names.clone() });
        Ok(names)
    }

    fn offered_tools(&self) -> Option<&[ChatTool]> {
        if self.tools.is_empty() {
            None
        } else {
            Some(&self.tools)
        }
    }

    async fn query(
        &self,
        staged: &StagedTurn<'_>,
        tools: Option<&[ChatTool]>,
        round: usize,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<AssistantTurn, AgentError> {
        send_event(event_tx, ReactEvent::Thinking { round });
        let transcript = staged.transcript();
        tracing::debug!(round, messages = transcript.len(), with_tools = tools.is_some(), "querying model");
        match self.llm.complete(&transcript, tools).await {
            Ok(turn) => Ok(turn),
            Err(e) => {
                tracing::error!(round, error = %e, "chat model request failed, discarding turn");
                send_event(event_tx, ReactEvent::Error { text: e.to_string() });
                Err(e.into())
            }
        }
    }

    /// 处理一行用户输入。
    ///
    /// 成功时本轮所有消息（user、assistant、tool）一次性追加到 history；
    /// 模型请求失败时返回 Err 且 history 保持不变。
    pub async fn run_turn(
        &self,
        history: &mut ConversationHistory,
        input: &str,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<TurnOutcome, AgentError> {
        if is_exit(input) {
            history.push(Message::user(input));
            tracing::info!("exit requested");
            return Ok(TurnOutcome::Exit);
        }

        let mut staged = history.stage();
        staged.push(Message::user(input));

        let mut turn = self.query(&staged, self.offered_tools(), 0, event_tx).await?;
        let mut round = 0;

        let answer = loop {
            let recognition = self.normalizer.normalize(&turn);
            for warning in recognition.warnings {
                tracing::warn!(warning = %warning, "normalizer fell through");
                send_event(event_tx, ReactEvent::NormalizeWarning { text: warning });
            }

            let (strategy, invocations) = match recognition.outcome {
                RecognitionOutcome::FinalAnswer(text) => {
                    staged.push(Message::assistant(text.clone()));
                    break text;
                }
                RecognitionOutcome::Invocations {
                    strategy,
                    invocations,
                } => (strategy, invocations),
            };

            if round >= self.max_tool_rounds {
                tracing::warn!(
                    rounds = round,
                    pending = invocations.len(),
                    "tool round limit reached, not dispatching"
                );
                send_event(event_tx, ReactEvent::RoundLimit { rounds: round });
                staged.push(Message::assistant(turn.text.clone()));
                break turn.text;
            }

            round += 1;
            tracing::info!(round, ?strategy, count = invocations.len(), "dispatching tool invocations");
            staged.push(Message::assistant_with_invocations(
                turn.text.clone(),
                invocations.clone(),
            ));
            for invocation in &invocations {
                let result = self.dispatch(invocation, event_tx).await;
                staged.push(Message::tool(result.invocation_id, result.text));
            }

            // 最后一次允许的追问不再附带 tools，促使模型给出最终回复
            let tools = if round < self.max_tool_rounds {
                self.offered_tools()
            } else {
                None
            };
            turn = self.query(&staged, tools, round, event_tx).await?;
        };

        let pending = staged.into_pending();
        history.commit(pending);
        send_event(event_tx, ReactEvent::Message { text: answer.clone() });
        Ok(TurnOutcome::Answer(answer))
    }

    /// 派发单个调用：参数检查 -> Sanitize -> 执行；任何失败都转为 "Error: ..." 结果文本
    async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> ToolResult {
        let tool = invocation.name.as_str();
        let parsed = invocation.arguments.parsed();

        let args = match parsed {
            Ok(map) => Value::Object(map.clone()),
            Err(_) => Value::String(invocation.arguments.to_json_text()),
        };
        let code = (tool == self.normalizer.code_tool())
            .then(|| args.get(self.normalizer.code_argument()))
            .flatten()
            .and_then(Value::as_str)
            .map(str::to_string);
        send_event(event_tx, ReactEvent::ToolCall {
            tool: tool.to_string(),
            args,
            code,
        });

        let outcome = match parsed {
            Ok(map) => {
                let sanitized = self.sanitizer.sanitize(map);
                self.executor.execute(tool, Value::Object(sanitized)).await
            }
            Err(reason) => Err(AgentError::InvalidArguments {
                tool: tool.to_string(),
                reason: reason.to_string(),
            }),
        };

        let text = match outcome {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool, id = %invocation.id, error = %e, "tool invocation failed");
                send_event(event_tx, ReactEvent::ToolFailure {
                    tool: tool.to_string(),
                    reason: e.to_string(),
                });
                format!("Error: {}", e)
            }
        };
        send_event(event_tx, ReactEvent::Observation {
            tool: tool.to_string(),
            preview: preview(&text, self.preview_chars),
        });

        ToolResult {
            invocation_id: invocation.id.clone(),
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::memory::Role;
    use crate::session::LocalSession;
    use crate::tools::{EchoTool, ToolRegistry};
    use tokio::sync::mpsc;

    fn orchestrator(mock: Arc<MockLlmClient>) -> OrchestrationLoop {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let executor = ToolExecutor::new(Arc::new(LocalSession::new(registry)), 5);
        OrchestrationLoop::new(
            mock,
            executor,
            CallFormNormalizer::new("echo", "text"),
            ArgumentSanitizer::default(),
        )
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("数据分析结果", 2), "数据...");
    }

    #[test]
    fn test_is_exit_trims() {
        assert!(is_exit("exit"));
        assert!(is_exit("  exit \n"));
        assert!(!is_exit("exit now"));
        assert!(!is_exit("Exit"));
    }

    #[tokio::test]
    async fn test_refresh_tools_strips_titles() {
        let mock = Arc::new(MockLlmClient::new());
        let mut orch = orchestrator(mock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let names = orch.refresh_tools(Some(&tx)).await.unwrap();
        assert_eq!(names, ["echo"]);
        let params = serde_json::to_string(&orch.tools()[0].function.parameters).unwrap();
        assert!(!params.contains("\"title\""));
        assert_eq!(rx.recv().await, Some(ReactEvent::ToolsReady { tools: names }));
    }

    #[tokio::test]
    async fn test_fenced_code_dispatch_emits_code() {
        let mock = Arc::new(MockLlmClient::with_turns([
            AssistantTurn::text("```\nhello there\n```"),
            AssistantTurn::text("It said hello."),
        ]));
        let orch = orchestrator(mock.clone());
        let mut history = ConversationHistory::with_system("sys");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.run_turn(&mut history, "say hi", Some(&tx)).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("It said hello.".to_string()));

        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history.messages()[3].content, "hello there");

        drop(tx);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(events.iter().any(|ev| matches!(
            ev,
            ReactEvent::ToolCall { code: Some(code), .. } if code == "hello there"
        )));
        assert!(matches!(events.last(), Some(ReactEvent::Message { text }) if text == "It said hello."));
    }

    #[tokio::test]
    async fn test_llm_failure_on_follow_up_discards_turn() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_turn(AssistantTurn::default().with_call("c1", "echo", r#"{"text":"x"}"#));
        mock.push_error(LlmError::Request("connection reset".to_string()));
        let orch = orchestrator(mock);
        let mut history = ConversationHistory::with_system("sys");

        let err = orch.run_turn(&mut history, "go", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Request(_))));
        assert_eq!(history.len(), 1);
    }
}
