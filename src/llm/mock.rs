//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序回放预置的 turn；脚本耗尽后回显最后一条 User 消息作为最终回复。
//! 每次请求都会被记录（消息数、是否带 tools），供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AssistantTurn, ChatTool, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Option<Vec<String>>,
}

/// Mock 客户端：脚本化回放
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<AssistantTurn, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: impl IntoIterator<Item = AssistantTurn>) -> Self {
        let mock = Self::new();
        for turn in turns {
            mock.push_turn(turn);
        }
        mock
    }

    pub fn push_turn(&self, turn: AssistantTurn) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(turn));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ChatTool]>,
    ) -> Result<AssistantTurn, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.map(|t| t.iter().map(|t| t.function.name.clone()).collect()),
            });
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(result) = scripted {
            return result;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(AssistantTurn::text(format!("Echo from Mock: {}", last_user)))
    }
}
