//! ReAct 主循环
//!
//! 用户输入 -> 调用模型网关（完整对话 + 工具清单）-> 若有工具调用则按请求顺序执行、逐个写回
//! ToolResult -> 下一轮；模型不再请求工具时结束。每轮开始检查取消与整体墙钟预算，
//! 网关调用本身与取消令牌竞争；步数上限、取消、超时都返回带兜底文本的 LoopResult 而不是错误。
//! 可选 event_tx：向前端推送 StepUpdate / ToolCall / Observation / MessageDone / Finished。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, LoopPhase, LoopResult, Termination};
use crate::llm::{ModelGateway, ModelResponse};
use crate::memory::{ConversationState, ToolRequest};
use crate::react::ReactEvent;
use crate::tools::schema::preview;
use crate::tools::ToolExecutor;

/// 默认最大迭代次数（网关调用次数）
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

/// 循环参数
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    /// 整体墙钟预算；None 表示不限
    pub time_budget: Option<Duration>,
    /// 同一轮的多个工具调用是否并发执行（结果仍按请求顺序写回）
    pub parallel_tool_calls: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            time_budget: None,
            parallel_tool_calls: false,
        }
    }
}

/// 单次运行的调用方上下文：取消令牌与可选事件通道
#[derive(Clone)]
pub struct RunContext {
    pub cancel_token: CancellationToken,
    pub event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 编排器：持有网关与工具执行器（因而循环期间工具集不可变）
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    executor: ToolExecutor,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        executor: ToolExecutor,
        config: LoopConfig,
    ) -> Result<Self, AgentError> {
        if config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        Ok(Self {
            gateway,
            executor,
            config,
        })
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 无取消、无事件通道的便捷入口
    pub async fn run(
        &self,
        state: &mut ConversationState,
        user_input: &str,
    ) -> Result<LoopResult, AgentError> {
        self.run_with(state, user_input, &RunContext::default()).await
    }

    /// 执行一次 ReAct 循环
    ///
    /// 网关错误与对话协议违规返回 Err；其余终止方式（含步数上限、取消、超时）均返回 Ok(LoopResult)。
    pub async fn run_with(
        &self,
        state: &mut ConversationState,
        user_input: &str,
        ctx: &RunContext,
    ) -> Result<LoopResult, AgentError> {
        let run_start = state.len();
        state.push_user(user_input)?;

        let manifest = self.executor.manifest();
        let started = Instant::now();
        let (init_prompt, init_completion, _) = self.gateway.token_usage();
        let max = self.config.max_iterations;
        let mut iterations = 0usize;

        loop {
            if ctx.cancel_token.is_cancelled() {
                return Ok(self.abort(Termination::Cancelled, iterations, state, run_start, ctx));
            }
            if let Some(budget) = self.config.time_budget {
                if started.elapsed() >= budget {
                    return Ok(self.abort(Termination::TimedOut, iterations, state, run_start, ctx));
                }
            }

            ctx.send(ReactEvent::StepUpdate {
                step: iterations + 1,
                max_steps: max,
            });
            ctx.send(ReactEvent::Phase {
                phase: LoopPhase::AwaitingModel,
            });
            ctx.send(ReactEvent::Thinking);

            let response = tokio::select! {
                biased;
                _ = ctx.cancel_token.cancelled() => {
                    tracing::info!(iteration = iterations + 1, "cancelled while awaiting model");
                    return Ok(self.abort(
                        Termination::Cancelled,
                        iterations,
                        state,
                        run_start,
                        ctx,
                    ));
                }
                r = self.gateway.complete(state, &manifest) => r,
            };
            iterations += 1;

            // 空的工具调用列表等同于最终回答
            let response = match response {
                Ok(ModelResponse::ToolRequests { content, requests }) => {
                    ModelResponse::from_parts(content, requests)
                }
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(iteration = iterations, error = %e, "model gateway failed");
                    ctx.send(ReactEvent::Error { text: e.to_string() });
                    return Err(e.into());
                }
            };

            match response {
                ModelResponse::Final { content } => {
                    state.push_assistant(Some(content.clone()), Vec::new())?;
                    tracing::info!(iteration = iterations, "model finished");
                    ctx.send(ReactEvent::MessageDone {
                        text: content.clone(),
                    });
                    self.report_usage(init_prompt, init_completion, ctx);
                    ctx.send(ReactEvent::Finished {
                        terminated_by: Termination::ModelFinished,
                        phase: LoopPhase::Done,
                        iterations,
                    });
                    return Ok(LoopResult {
                        final_answer: content,
                        iteration_count: iterations,
                        terminated_by: Termination::ModelFinished,
                    });
                }
                ModelResponse::ToolRequests { content, requests } => {
                    let requests = normalize_call_ids(requests);
                    if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                        ctx.send(ReactEvent::ThinkingContent {
                            text: preview(text, THINKING_PREVIEW_CHARS),
                        });
                    }
                    tracing::info!(
                        iteration = iterations,
                        tools = %requests.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(","),
                        "dispatching tool requests"
                    );
                    state.push_assistant(content, requests.clone())?;
                    ctx.send(ReactEvent::Phase {
                        phase: LoopPhase::DispatchingTools,
                    });

                    let observations = self.dispatch_all(&requests, ctx).await;
                    for (request, observation) in requests.iter().zip(observations) {
                        state.push_tool_result(request.call_id.clone(), observation)?;
                    }
                }
            }

            if iterations >= max {
                tracing::warn!(max_iterations = max, "max iterations reached");
                self.report_usage(init_prompt, init_completion, ctx);
                return Ok(self.abort(
                    Termination::MaxIterationsReached,
                    iterations,
                    state,
                    run_start,
                    ctx,
                ));
            }
        }
    }

    /// 按请求顺序得到每个调用的 Observation；并发模式下 join_all 同样保持输入顺序
    async fn dispatch_all(&self, requests: &[ToolRequest], ctx: &RunContext) -> Vec<String> {
        if self.config.parallel_tool_calls && requests.len() > 1 {
            join_all(requests.iter().map(|r| self.observe(r, ctx))).await
        } else {
            let mut out = Vec::with_capacity(requests.len());
            for r in requests {
                out.push(self.observe(r, ctx).await);
            }
            out
        }
    }

    /// 执行单个工具调用；任何 ToolError 都转为 `Error: ...` 文本，保证每个请求都有结果
    async fn observe(&self, request: &ToolRequest, ctx: &RunContext) -> String {
        ctx.send(ReactEvent::ToolCall {
            call_id: request.call_id.clone(),
            tool: request.name.clone(),
            args: request.arguments.clone(),
        });
        let observation = match self
            .executor
            .execute(&request.name, request.arguments.clone())
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %request.name, call_id = %request.call_id, error = %e, "tool failed");
                ctx.send(ReactEvent::ToolFailure {
                    tool: request.name.clone(),
                    reason: e.to_string(),
                });
                format!("Error: {}", e)
            }
        };
        ctx.send(ReactEvent::Observation {
            call_id: request.call_id.clone(),
            tool: request.name.clone(),
            preview: preview(&observation, OBSERVATION_PREVIEW_CHARS),
        });
        observation
    }

    fn report_usage(&self, init_prompt: u64, init_completion: u64, ctx: &RunContext) {
        let (prompt, completion, _) = self.gateway.token_usage();
        let prompt = prompt.saturating_sub(init_prompt);
        let completion = completion.saturating_sub(init_completion);
        ctx.send(ReactEvent::TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        });
    }

    fn abort(
        &self,
        termination: Termination,
        iterations: usize,
        state: &ConversationState,
        run_start: usize,
        ctx: &RunContext,
    ) -> LoopResult {
        let headline = match termination {
            Termination::MaxIterationsReached => format!(
                "Stopped after reaching the maximum of {} iterations without a final answer.",
                self.config.max_iterations
            ),
            Termination::Cancelled => format!(
                "Cancelled after {} iteration(s) before a final answer was produced.",
                iterations
            ),
            Termination::TimedOut => format!(
                "Stopped after exceeding the time budget of {}s without a final answer.",
                self.config.time_budget.map(|d| d.as_secs_f64()).unwrap_or_default()
            ),
            Termination::ModelFinished => String::new(),
        };
        let final_answer = match state.last_assistant_content_since(run_start) {
            Some(partial) => format!("{}\n\nLast model output:\n{}", headline, partial),
            None => headline,
        };
        ctx.send(ReactEvent::Finished {
            terminated_by: termination,
            phase: termination.phase(),
            iterations,
        });
        LoopResult {
            final_answer,
            iteration_count: iterations,
            terminated_by: termination,
        }
    }
}

/// 保证同一轮内 call_id 非空且唯一，否则 ToolResult 无法一一对应
fn normalize_call_ids(requests: Vec<ToolRequest>) -> Vec<ToolRequest> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .map(|mut r| {
            if r.call_id.is_empty() || !seen.insert(r.call_id.clone()) {
                let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                tracing::debug!(tool = %r.name, old = %r.call_id, new = %fresh, "reassigned call_id");
                r.call_id = fresh;
                seen.insert(r.call_id.clone());
            }
            r
        })
        .collect()
}
