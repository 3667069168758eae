//! OpenAI 兼容 API 网关
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 请求/响应使用本模块定义的线协议类型（async_openai 的 byot 接口），直接对齐 chat completions
//! 的 tool calling 格式：assistant.tool_calls / tool.tool_call_id / tools[].function。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::GatewayError;
use crate::llm::{ModelGateway, ModelResponse};
use crate::memory::{ConversationState, ToolRequest, Turn};
use crate::tools::ToolDescriptor;

/// 默认单次请求超时（秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON 编码后的参数字符串
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI 兼容网关：持有 Client、model 名与请求超时
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiGateway {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn build_request(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
    ) -> ChatRequest {
        let tools: Vec<WireTool> = tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();
        ChatRequest {
            model: self.model.clone(),
            messages: to_wire_messages(conversation),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            temperature: self.temperature,
        }
    }

    pub(crate) fn parse_response(&self, response: ChatResponse) -> Result<ModelResponse, GatewayError> {
        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("response has no choices".into()))?;

        let content = choice.message.content.filter(|c| !c.trim().is_empty());
        let requests: Vec<ToolRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let call_id = if call.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    call.id
                };
                to_tool_request(call_id, call.function.name, &call.function.arguments)
            })
            .collect();
        Ok(ModelResponse::from_parts(content, requests))
    }
}

/// 模型给出的参数字符串：空串视为 {}；无法解析时保留原文，由工具报告 InvalidArguments
fn to_tool_request(call_id: String, name: String, raw: &str) -> ToolRequest {
    if raw.trim().is_empty() {
        return ToolRequest::new(call_id, name, Value::Object(Default::default()));
    }
    match serde_json::from_str(raw) {
        Ok(arguments) => ToolRequest::new(call_id, name, arguments),
        Err(_) => ToolRequest::unparsed(call_id, name, raw),
    }
}

/// 回传给模型的参数文本：解析失败的保持原文，其余重新编码为 JSON
fn encode_arguments(request: &ToolRequest) -> String {
    match &request.raw_arguments {
        Some(raw) => raw.clone(),
        None => request.arguments.to_string(),
    }
}

fn to_wire_messages(conversation: &ConversationState) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    if let Some(system) = conversation.system_prompt() {
        messages.push(WireMessage::text("system", system));
    }
    for turn in conversation.turns() {
        let message = match turn {
            Turn::User { content } => WireMessage::text("user", content.clone()),
            Turn::Assistant {
                content,
                tool_requests,
            } => WireMessage {
                role: "assistant",
                content: match (content, tool_requests.is_empty()) {
                    (Some(c), _) => Some(c.clone()),
                    (None, true) => Some(String::new()),
                    (None, false) => None,
                },
                tool_calls: tool_requests
                    .iter()
                    .map(|r| WireToolCall {
                        id: r.call_id.clone(),
                        kind: function_kind(),
                        function: WireFunctionCall {
                            name: r.name.clone(),
                            arguments: encode_arguments(r),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            Turn::ToolResult { call_id, content } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.clone()),
            },
        };
        messages.push(message);
    }
    messages
}

fn map_openai_error(e: OpenAIError) -> GatewayError {
    match e {
        OpenAIError::JSONDeserialize(..) => GatewayError::InvalidResponse(e.to_string()),
        other => GatewayError::Provider(other.to_string()),
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, GatewayError> {
        let request = self.build_request(conversation, tools);
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );

        let chat = self.client.chat();
        let call = chat.create_byot(request);
        let response: ChatResponse = tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout(self.request_timeout.as_secs()))?
            .map_err(map_openai_error)?;

        self.parse_response(response)
    }
}
