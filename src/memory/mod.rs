//! 记忆层：对话状态（只追加日志）、会话持久化、检索用分词

pub mod conversation;
pub mod persistence;
pub mod tokenizer;

pub use conversation::{ConversationState, ToolRequest, Turn, TurnId};
pub use persistence::ConversationPersistence;
