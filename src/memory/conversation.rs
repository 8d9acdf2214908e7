//! 对话历史
//!
//! 只追加、不修改、不删除：模型每轮都能看到完整的多轮记录。
//! 一轮用户输入先在 StagedTurn 中暂存，成功后一次性 commit，LLM 失败时整轮丢弃。

use serde::{Deserialize, Serialize};

use crate::tools::ToolInvocation;

/// 消息角色（与 Chat Completion API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息；assistant 可携带 invocations，tool 必须携带 tool_call_id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            invocations: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    /// 带工具调用的 assistant 消息（文本可为空，仅作说明）
    pub fn assistant_with_invocations(
        content: impl Into<String>,
        invocations: Vec<ToolInvocation>,
    ) -> Self {
        Self {
            invocations,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    /// 工具结果消息，按 invocation id 与上一条 assistant 消息配对
    pub fn tool(invocation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(invocation_id.into()),
            ..Self::plain(Role::Tool, content.into())
        }
    }
}

/// 检查 tool 消息是否引用了「紧邻的上一条 assistant 消息」中的某个 invocation。
/// 中间允许夹着同一批次的其它 tool 消息。
fn references_preceding_assistant<'a>(
    existing: impl DoubleEndedIterator<Item = &'a Message>,
    msg: &Message,
) -> bool {
    let Some(id) = msg.tool_call_id.as_deref() else {
        return false;
    };
    existing
        .rev()
        .find(|m| m.role != Role::Tool)
        .map(|m| m.role == Role::Assistant && m.invocations.iter().any(|inv| inv.id == id))
        .unwrap_or(false)
}

/// 会话历史：只增不减，由编排循环独占
#[derive(Clone, Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一条 system 消息开头的历史
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push(&mut self, msg: Message) {
        debug_assert!(self.accepts(&msg), "tool message without matching invocation");
        self.messages.push(msg);
    }

    /// 该消息追加后是否仍满足 tool 消息配对约束
    pub fn accepts(&self, msg: &Message) -> bool {
        msg.role != Role::Tool || references_preceding_assistant(self.messages.iter(), msg)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 开始暂存一轮：读取当前历史，新消息只写入暂存区
    pub fn stage(&self) -> StagedTurn<'_> {
        StagedTurn {
            base: &self.messages,
            pending: Vec::new(),
        }
    }

    /// 提交暂存区的消息（按顺序追加）
    pub fn commit(&mut self, pending: Vec<Message>) {
        for msg in pending {
            self.push(msg);
        }
    }
}

/// 一轮用户输入的暂存区：成功才并入历史
#[derive(Debug)]
pub struct StagedTurn<'a> {
    base: &'a [Message],
    pending: Vec<Message>,
}

impl StagedTurn<'_> {
    pub fn push(&mut self, msg: Message) {
        debug_assert!(
            msg.role != Role::Tool
                || references_preceding_assistant(self.base.iter().chain(self.pending.iter()), &msg),
            "tool message without matching invocation"
        );
        self.pending.push(msg);
    }

    /// 发给模型的完整上下文：已提交历史 + 本轮暂存
    pub fn transcript(&self) -> Vec<Message> {
        self.base.iter().chain(self.pending.iter()).cloned().collect()
    }

    pub fn into_pending(self) -> Vec<Message> {
        self.pending
    }
}
