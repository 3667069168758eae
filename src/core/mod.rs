//! 核心类型：分层错误与循环状态

pub mod error;
pub mod state;

pub use error::{AgentError, ConversationError, GatewayError, RegistryError, ToolError};
pub use state::{LoopPhase, LoopResult, Termination};
