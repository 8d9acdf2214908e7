//! LLM 层：Chat Model 抽象与实现（OpenAI 兼容 / Mock）与重试包装

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::{MockLlmClient, RecordedRequest};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{AssistantTurn, LlmClient, LlmError, NativeCall, RetryConfig, RetryingLlmClient};
pub use types::ChatTool;
