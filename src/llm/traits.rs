//! 模型网关抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / 脚本化）实现 ModelGateway：给定完整对话与工具清单，
//! 返回「最终回答」或「工具调用请求」两者之一。网关对单次调用无状态。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::GatewayError;
use crate::memory::{ConversationState, ToolRequest};
use crate::tools::ToolDescriptor;

/// 模型单次回复
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelResponse {
    /// 不含工具调用：循环结束
    Final { content: String },
    /// 至少一个工具调用；content 为模型随调用附带的推理文本（可无）
    ToolRequests {
        #[serde(default)]
        content: Option<String>,
        requests: Vec<ToolRequest>,
    },
}

impl ModelResponse {
    pub fn final_answer(content: impl Into<String>) -> Self {
        ModelResponse::Final {
            content: content.into(),
        }
    }

    /// 由文本与工具调用构造；调用列表为空时退化为 Final
    pub fn from_parts(content: Option<String>, requests: Vec<ToolRequest>) -> Self {
        if requests.is_empty() {
            ModelResponse::Final {
                content: content.unwrap_or_default(),
            }
        } else {
            ModelResponse::ToolRequests { content, requests }
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            ModelResponse::Final { content } => Some(content.as_str()),
            ModelResponse::ToolRequests { content, .. } => content.as_deref(),
        }
    }
}

/// 模型网关 trait
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, GatewayError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
