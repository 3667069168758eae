//! 脚本化模型网关（用于测试与演示，无需 API）
//!
//! 按顺序回放预先给定的 ModelResponse，并记录每次收到的完整对话与工具清单，
//! 便于断言「每次调用都发送了全部轮次」。脚本用完后返回 ScriptExhausted。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::GatewayError;
use crate::llm::{ModelGateway, ModelResponse};
use crate::memory::{ConversationState, ToolRequest};
use crate::tools::ToolDescriptor;

/// 一次被记录的网关调用
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub conversation: ConversationState,
    pub tool_names: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<ModelResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 每次调用前先等待一段时间（测试取消与超时）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// 便捷构造：一次工具调用请求（call_id 为空时由网关补全）
pub fn tool_call(name: &str, arguments: Value) -> ToolRequest {
    ToolRequest::new(String::new(), name, arguments)
}

fn fill_call_ids(response: ModelResponse) -> ModelResponse {
    match response {
        ModelResponse::ToolRequests { content, requests } => ModelResponse::ToolRequests {
            content,
            requests: requests
                .into_iter()
                .map(|mut r| {
                    if r.call_id.is_empty() {
                        r.call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    }
                    r
                })
                .collect(),
        },
        other => other,
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, GatewayError> {
        let call_index = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| GatewayError::Provider("scripted gateway lock poisoned".into()))?;
            calls.push(RecordedCall {
                conversation: conversation.clone(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .map_err(|_| GatewayError::Provider("scripted gateway lock poisoned".into()))?
            .pop_front();
        next.map(fill_call_ids)
            .ok_or(GatewayError::ScriptExhausted(call_index - 1))
    }
}
