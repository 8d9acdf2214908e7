//! Chat Model 抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：给定消息历史与可选 tools，返回一个 assistant turn。
//! RetryingLlmClient 在边界处统一加超时与有限次重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::ChatTool;
use crate::memory::Message;

/// 后端原生返回的结构化 tool call（arguments 为 JSON 文本，解析推迟到 Normalizer）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// 一次 Chat Completion 的输出：自由文本 + 原生 tool calls（可能为空）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantTurn {
    pub text: String,
    pub native_calls: Vec<NativeCall>,
}

impl AssistantTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            native_calls: Vec::new(),
        }
    }

    pub fn with_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.native_calls.push(NativeCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        });
        self
    }
}

/// LLM 请求错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 网络类错误可重试；响应格式错误重试无意义
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Request(_) | LlmError::Timeout(_))
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为 None 时请求不带 tools 字段
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ChatTool]>,
    ) -> Result<AssistantTurn, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 超时与重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub timeout: Duration,
    /// 首次失败后的额外尝试次数
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

/// 包装任意 LlmClient：每次请求加超时，网络类错误按 max_retries 重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ChatTool]>,
    ) -> Result<AssistantTurn, LlmError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.config.timeout,
                self.inner.complete(messages, tools),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout(self.config.timeout.as_secs())),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "LLM request failed, retrying");
                    tokio::time::sleep(self.config.backoff).await;
                }
                other => return other,
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
