//! 记忆层：只追加的对话历史

pub mod conversation;

pub use conversation::{ConversationHistory, Message, Role, StagedTurn};
