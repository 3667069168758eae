//! Agent 运行时装配
//!
//! 从 AppConfig 构建模型网关、工具注册表（calculator / search_report）与编排器；
//! ask 对单条用户输入跑 ReAct 循环，并用本轮检索结果为最终答案附上引用来源。

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::config::{AppConfig, LlmSection, RetrievalSection};
use crate::core::{AgentError, LoopResult};
use crate::knowledge::KeywordIndex;
use crate::llm::{create_deepseek_gateway, ModelGateway, OpenAiGateway};
use crate::memory::{ConversationState, Turn};
use crate::react::{Orchestrator, RunContext};
use crate::synthesis::{AnswerFormatter, FormattedAnswer};
use crate::tools::{
    CalculatorTool, RetrievalTool, ToolExecutor, ToolRegistry, CALCULATOR_TOOL_NAME,
    RETRIEVAL_TOOL_NAME,
};

/// 内置 system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional financial analysis assistant.

## Capabilities
You can use tools to:
- search the loaded financial reports (search_report)
- perform exact arithmetic (calculator)

## Workflow
1. Work out which facts the question needs.
2. Use the tools to obtain them, one piece at a time for multi-step questions.
3. Analyse the data you obtained.
4. Give an accurate, evidence-based answer.

## Rules
1. Always use the calculator for arithmetic; never compute in your head.
2. Base every figure on tool output; never invent numbers.
3. Cite retrieved passages with their numbers, e.g. [1], [2].
4. If the data cannot be found, say so plainly instead of guessing.";

/// 一次提问的结果：循环结果 + 带引用的格式化答案
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub result: LoopResult,
    pub answer: FormattedAnswer,
}

pub struct Agent {
    orchestrator: Orchestrator,
    system_prompt: String,
    formatter: AnswerFormatter,
}

impl Agent {
    pub fn new(orchestrator: Orchestrator, system_prompt: impl Into<String>) -> Self {
        Self {
            orchestrator,
            system_prompt: system_prompt.into(),
            formatter: AnswerFormatter::new(),
        }
    }

    /// 按配置装配：网关、工具、循环参数、system prompt
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let gateway = create_gateway_from_config(&cfg.llm)?;
        let registry = build_registry(&cfg.agent.tools, &cfg.tools.retrieval)?;
        let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);
        let orchestrator = Orchestrator::new(gateway, executor, cfg.agent.loop_config())?;
        let system_prompt = load_system_prompt(cfg.agent.system_prompt_path.as_deref())?;
        tracing::info!(
            tools = %orchestrator.executor().tool_names().join(","),
            max_iterations = cfg.agent.max_iterations,
            "agent ready"
        );
        Ok(Self::new(orchestrator, system_prompt))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// 新对话（带 system prompt）
    pub fn new_conversation(&self) -> ConversationState {
        ConversationState::new().with_system_prompt(self.system_prompt.clone())
    }

    pub async fn ask(
        &self,
        state: &mut ConversationState,
        question: &str,
    ) -> Result<AgentReply, AgentError> {
        self.ask_with(state, question, &RunContext::default()).await
    }

    pub async fn ask_with(
        &self,
        state: &mut ConversationState,
        question: &str,
        ctx: &RunContext,
    ) -> Result<AgentReply, AgentError> {
        let start = state.len();
        let result = self.orchestrator.run_with(state, question, ctx).await?;
        let sources = latest_retrieval_output(state, start)
            .map(|output| self.formatter.parse_sources(output))
            .unwrap_or_default();
        let answer = self.formatter.format(&result.final_answer, sources);
        Ok(AgentReply { result, answer })
    }
}

/// 本轮（start 之后）最近一次检索工具的输出；[n] 编号只在单次检索输出内有意义
fn latest_retrieval_output(state: &ConversationState, start: usize) -> Option<&str> {
    state.turns().get(start..)?.iter().rev().find_map(|t| match t {
        Turn::ToolResult { call_id, content }
            if state.tool_name_for(call_id) == Some(RETRIEVAL_TOOL_NAME) =>
        {
            Some(content.as_str())
        }
        _ => None,
    })
}

/// 按 [llm] 段创建网关：provider = openai | deepseek
pub fn create_gateway_from_config(llm: &LlmSection) -> anyhow::Result<Arc<dyn ModelGateway>> {
    let provider = llm.provider.to_lowercase();
    let gateway = match provider.as_str() {
        "deepseek" => {
            let model = llm.model.starts_with("deepseek").then_some(llm.model.as_str());
            if std::env::var("DEEPSEEK_API_KEY").is_err() && std::env::var("OPENAI_API_KEY").is_err() {
                tracing::warn!("DEEPSEEK_API_KEY is not set; requests will be rejected by the provider");
            }
            create_deepseek_gateway(model)
        }
        "openai" => {
            if std::env::var("OPENAI_API_KEY").is_err() {
                tracing::warn!("OPENAI_API_KEY is not set; requests will be rejected by the provider");
            }
            OpenAiGateway::new(llm.base_url.as_deref(), &llm.model, None)
        }
        other => bail!("unknown llm provider '{}' (expected openai or deepseek)", other),
    };
    let gateway = gateway.with_request_timeout(std::time::Duration::from_secs(llm.timeouts.request));
    let gateway = match llm.temperature {
        Some(t) => gateway.with_temperature(t),
        None => gateway,
    };
    tracing::info!(provider = %provider, model = %gateway.model(), "model gateway configured");
    Ok(Arc::new(gateway))
}

/// 按名称注册工具；名称顺序即清单顺序
pub fn build_registry(
    tool_names: &[String],
    retrieval: &RetrievalSection,
) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for name in tool_names {
        match name.as_str() {
            CALCULATOR_TOOL_NAME => registry.register(CalculatorTool)?,
            RETRIEVAL_TOOL_NAME => {
                let index = match &retrieval.index_path {
                    Some(path) if path.exists() => KeywordIndex::from_json_file(path)
                        .with_context(|| format!("loading documents from {}", path.display()))?,
                    Some(path) => {
                        tracing::warn!(path = %path.display(), "document file not found; search_report starts empty");
                        KeywordIndex::new()
                    }
                    None => KeywordIndex::new(),
                };
                tracing::info!(documents = index.len(), "keyword index loaded");
                registry.register(
                    RetrievalTool::new(Arc::new(index)).with_settings(retrieval.settings()),
                )?
            }
            other => bail!("unknown tool '{}' in [agent].tools", other),
        }
    }
    Ok(registry)
}

pub fn load_system_prompt(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("reading system prompt {}", p.display())),
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}
