//! ReAct 过程事件：用于流式展示迭代、工具调用、观察与最终回复

use serde::Serialize;

use crate::core::{LoopPhase, Termination};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 进入第几次迭代（从 1 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用模型
    Thinking,
    /// 循环进入新阶段（等待模型 / 执行工具）
    Phase { phase: LoopPhase },
    /// 模型随工具调用附带的推理文本
    ThinkingContent { text: String },
    /// 调用工具
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 工具执行失败（同时也会以 Error: ... 形式作为 Observation 回灌）
    ToolFailure { tool: String, reason: String },
    /// 最终回复
    MessageDone { text: String },
    /// Token 使用统计（本次循环增量）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 循环结束
    Finished {
        terminated_by: Termination,
        /// Done 或 Aborted
        phase: LoopPhase,
        iterations: usize,
    },
    /// 错误
    Error { text: String },
}
