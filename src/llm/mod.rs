//! 模型网关层：抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_gateway, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{tool_call, RecordedCall, ScriptedGateway};
pub use openai::{OpenAiGateway, TokenUsage};
pub use traits::{ModelGateway, ModelResponse};
