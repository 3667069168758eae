//! 错误类型
//!
//! 分层错误：工具层（ToolError，可恢复，转为 Observation 回灌给模型）、注册表（RegistryError，启动期）、
//! 对话协议（ConversationError）、模型网关（GatewayError，对当前循环致命），以及对外的 AgentError。

use thiserror::Error;

/// 工具执行错误：全部可恢复，由编排器渲染为 `Error: ...` 形式的 Observation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 参数缺失或类型错误（模型可据此修正参数后重试）
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool not found: '{name}'. Available tools: {}", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    /// 工具运行失败（如表达式非法、索引不可用）
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Tool '{tool}' timed out after {ms}ms")]
    Timeout { tool: String, ms: u64 },
}

/// 工具注册错误（启动期）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Invalid parameter schema for tool '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// 对话日志的协议违规：出现即说明编排逻辑或会话文件有问题
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Tool result without a preceding assistant turn (call_id: {0})")]
    NoAssistantTurn(String),

    #[error("Tool result references unknown call_id: {0}")]
    UnknownCallId(String),

    #[error("Duplicate tool result for call_id: {0}")]
    DuplicateToolResult(String),

    #[error("Assistant turn still has {0} unanswered tool request(s)")]
    PendingToolResults(usize),
}

/// 模型网关错误：对当前循环致命，不在循环内重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    /// 脚本化网关的响应已用完（测试中表示模型被多调用了一次）
    #[error("Scripted gateway exhausted after {0} call(s)")]
    ScriptExhausted(usize),
}

/// ReAct 循环对调用方暴露的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model gateway failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Conversation protocol violated: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Config error: {0}")]
    Config(String),
}
