//! ReAct 循环集成测试：脚本化网关 + 真实工具

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sage::core::{AgentError, ToolError};
use sage::knowledge::KeywordIndex;
use sage::llm::{tool_call, ModelResponse, ScriptedGateway};
use sage::memory::{ConversationState, ToolRequest, Turn};
use sage::tools::{CalculatorTool, RetrievalTool, Tool, ToolExecutor, ToolRegistry};
use sage::{LoopConfig, Orchestrator, RunContext, Termination};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// 按参数 ms 睡眠后返回 label
struct Sleepy;

#[async_trait]
impl Tool for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn description(&self) -> &str {
        "sleeps then echoes its label"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"label": {"type": "string"}, "ms": {"type": "integer"}},
            "required": ["label", "ms"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let label = args["label"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("label is required".into()))?
            .to_string();
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(label)
    }
}

/// 总是 panic
struct Faulty;

#[async_trait]
impl Tool for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn description(&self) -> &str {
        "always crashes"
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        panic!("index out of range");
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool).unwrap();
    registry.register(Sleepy).unwrap();
    registry
}

fn orchestrator(gateway: Arc<ScriptedGateway>, config: LoopConfig) -> Orchestrator {
    Orchestrator::new(gateway, ToolExecutor::new(registry(), 5), config).unwrap()
}

fn requests(reqs: Vec<ToolRequest>) -> ModelResponse {
    ModelResponse::from_parts(None, reqs)
}

fn tool_results(state: &ConversationState) -> Vec<(String, String)> {
    state
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResult { call_id, content } => Some((call_id.clone(), content.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn calculator_then_final_answer() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        requests(vec![ToolRequest::new(
            "c1",
            "calculator",
            json!({"expression": "100*0.15"}),
        )]),
        ModelResponse::final_answer("15% of 100 is 15.0"),
    ]));
    let orch = orchestrator(gateway.clone(), LoopConfig::default());
    let mut state = ConversationState::new().with_system_prompt("system");

    let result = orch.run(&mut state, "What is 15% of 100?").await.unwrap();

    assert!(result.final_answer.contains("15.0"));
    assert_eq!(result.terminated_by, Termination::ModelFinished);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(tool_results(&state), vec![("c1".to_string(), "15".to_string())]);

    // 每次调用都发送完整对话
    let calls = gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].conversation.len(), 1);
    assert_eq!(calls[1].conversation.len(), 3);
    assert_eq!(calls[1].conversation.turns(), &state.turns()[..3]);
    assert_eq!(calls[0].tool_names, vec!["calculator", "sleepy"]);
    assert_eq!(calls[0].tool_names, calls[1].tool_names);
}

#[tokio::test]
async fn stops_at_exactly_max_iterations() {
    let script = (0..5).map(|_| requests(vec![tool_call("calculator", json!({"expression": "1+1"}))]));
    let gateway = Arc::new(ScriptedGateway::new(script));
    let orch = orchestrator(
        gateway.clone(),
        LoopConfig {
            max_iterations: 3,
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "loop forever").await.unwrap();

    assert_eq!(result.terminated_by, Termination::MaxIterationsReached);
    assert_eq!(result.iteration_count, 3);
    assert_eq!(gateway.call_count(), 3);
    assert_eq!(gateway.remaining(), 2);
    assert!(result
        .final_answer
        .starts_with("Stopped after reaching the maximum of 3 iterations"));
    assert!(state.pending_call_ids().is_empty());
}

#[tokio::test]
async fn max_iterations_fallback_keeps_last_model_text() {
    let script = (0..2).map(|i| {
        ModelResponse::from_parts(
            Some(format!("still thinking {i}")),
            vec![tool_call("calculator", json!({"expression": "2*2"}))],
        )
    });
    let orch = orchestrator(
        Arc::new(ScriptedGateway::new(script)),
        LoopConfig {
            max_iterations: 2,
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();
    let result = orch.run(&mut state, "q").await.unwrap();
    assert!(result.final_answer.ends_with("still thinking 1"));
}

#[tokio::test]
async fn retrieval_with_impossible_year_reports_no_results() {
    let index = KeywordIndex::from_json_str(
        r#"[{"text": "Total net sales 416,161 million", "metadata": {"page": 1, "year": 2025}}]"#,
    )
    .unwrap();
    let mut registry = ToolRegistry::new();
    registry.register(RetrievalTool::new(Arc::new(index))).unwrap();
    let gateway = Arc::new(ScriptedGateway::new(vec![
        requests(vec![ToolRequest::new(
            "s1",
            "search_report",
            json!({"query": "quantum entanglement", "year": 2099}),
        )]),
        ModelResponse::final_answer("I could not find that in the reports."),
    ]));
    let orch = Orchestrator::new(gateway, ToolExecutor::new(registry, 5), LoopConfig::default())
        .unwrap();
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "quantum entanglement in 2099?").await.unwrap();

    assert!(result.is_finished());
    let results = tool_results(&state);
    assert_eq!(results.len(), 1);
    assert!(!results[0].1.is_empty());
    assert!(results[0]
        .1
        .starts_with("No relevant information found for 'quantum entanglement'"));
}

async fn run_two_requests(parallel: bool) -> ConversationState {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        requests(vec![
            ToolRequest::new("a", "sleepy", json!({"label": "slow", "ms": 60})),
            ToolRequest::new("b", "sleepy", json!({"label": "fast", "ms": 0})),
        ]),
        ModelResponse::final_answer("done"),
    ]));
    let orch = orchestrator(
        gateway,
        LoopConfig {
            parallel_tool_calls: parallel,
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();
    orch.run(&mut state, "two tools").await.unwrap();
    state
}

#[tokio::test]
async fn tool_results_follow_request_order() {
    for parallel in [false, true] {
        let state = run_two_requests(parallel).await;
        assert_eq!(
            tool_results(&state),
            vec![
                ("a".to_string(), "slow".to_string()),
                ("b".to_string(), "fast".to_string())
            ],
            "parallel = {parallel}"
        );
    }
}

#[tokio::test]
async fn every_request_gets_exactly_one_result() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        requests(vec![
            ToolRequest::new("x1", "calculator", json!({"expression": "6*7"})),
            ToolRequest::new("x2", "no_such_tool", json!({})),
            ToolRequest::new("x3", "calculator", json!({"wrong": 1})),
            ToolRequest::new("x4", "calculator", json!({"expression": "1/0"})),
        ]),
        ModelResponse::final_answer("ok"),
    ]));
    let orch = orchestrator(gateway, LoopConfig::default());
    let mut state = ConversationState::new();
    orch.run(&mut state, "mixed").await.unwrap();

    let results: HashMap<String, String> = tool_results(&state).into_iter().collect();
    assert_eq!(results.len(), 4);
    assert_eq!(results["x1"], "42");
    assert!(results["x2"].starts_with("Error: Tool not found: 'no_such_tool'"));
    assert!(results["x2"].contains("calculator, sleepy"));
    assert!(results["x3"].starts_with("Error: Invalid arguments"));
    assert!(results["x4"].starts_with("Error: Execution failed"));
}

#[tokio::test]
async fn cancelled_before_first_call() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ModelResponse::final_answer("never")]));
    let orch = orchestrator(gateway.clone(), LoopConfig::default());
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RunContext::new().with_cancel_token(token);
    let mut state = ConversationState::new();

    let result = orch.run_with(&mut state, "q", &ctx).await.unwrap();

    assert_eq!(result.terminated_by, Termination::Cancelled);
    assert_eq!(result.iteration_count, 0);
    assert!(!result.final_answer.is_empty());
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn cancelled_while_waiting_for_model() {
    let gateway = Arc::new(
        ScriptedGateway::new(vec![ModelResponse::final_answer("too late")])
            .with_delay(Duration::from_secs(5)),
    );
    let orch = orchestrator(gateway, LoopConfig::default());
    let token = CancellationToken::new();
    let ctx = RunContext::new().with_cancel_token(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let mut state = ConversationState::new();

    let result = tokio::time::timeout(Duration::from_secs(2), orch.run_with(&mut state, "q", &ctx))
        .await
        .expect("cancellation should interrupt the model call")
        .unwrap();

    assert_eq!(result.terminated_by, Termination::Cancelled);
    assert_eq!(state.len(), 1);
}

#[tokio::test]
async fn zero_time_budget_times_out() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ModelResponse::final_answer("never")]));
    let orch = orchestrator(
        gateway.clone(),
        LoopConfig {
            time_budget: Some(Duration::ZERO),
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "q").await.unwrap();

    assert_eq!(result.terminated_by, Termination::TimedOut);
    assert_eq!(gateway.call_count(), 0);
    assert!(result.final_answer.contains("time budget"));
}

#[tokio::test]
async fn conversation_continues_across_runs() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ModelResponse::final_answer("first"),
        ModelResponse::final_answer("second"),
    ]));
    let orch = orchestrator(gateway.clone(), LoopConfig::default());
    let mut state = ConversationState::new();

    orch.run(&mut state, "one").await.unwrap();
    let result = orch.run(&mut state, "two").await.unwrap();

    assert_eq!(result.final_answer, "second");
    assert_eq!(result.iteration_count, 1);
    assert_eq!(state.len(), 4);
    assert_eq!(gateway.calls()[1].conversation.len(), 3);
}

#[tokio::test]
async fn fallback_ignores_previous_run_output() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ModelResponse::final_answer("earlier answer"),
        requests(vec![tool_call("calculator", json!({"expression": "1+1"}))]),
    ]));
    let orch = orchestrator(
        gateway,
        LoopConfig {
            max_iterations: 1,
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();

    orch.run(&mut state, "one").await.unwrap();
    let result = orch.run(&mut state, "two").await.unwrap();

    assert_eq!(result.terminated_by, Termination::MaxIterationsReached);
    assert!(!result.final_answer.contains("earlier answer"));
}

#[tokio::test]
async fn empty_tool_request_list_finishes_the_run() {
    let empty = || ModelResponse::ToolRequests {
        content: Some("all done".into()),
        requests: Vec::new(),
    };
    let gateway = Arc::new(ScriptedGateway::new(vec![empty(), empty(), empty()]));
    let orch = orchestrator(
        gateway.clone(),
        LoopConfig {
            max_iterations: 3,
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "anything left?").await.unwrap();

    assert_eq!(result.terminated_by, Termination::ModelFinished);
    assert_eq!(result.iteration_count, 1);
    assert_eq!(result.final_answer, "all done");
    assert_eq!(gateway.call_count(), 1);
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn panicking_tool_becomes_observation_and_loop_continues() {
    let mut registry = ToolRegistry::new();
    registry.register(Faulty).unwrap();
    registry.register(CalculatorTool).unwrap();
    let gateway = Arc::new(ScriptedGateway::new(vec![
        requests(vec![
            ToolRequest::new("f1", "faulty", json!({})),
            ToolRequest::new("c1", "calculator", json!({"expression": "3*3"})),
        ]),
        ModelResponse::final_answer("9, the other tool failed"),
    ]));
    let orch = Orchestrator::new(
        gateway.clone(),
        ToolExecutor::new(registry, 5),
        LoopConfig::default(),
    )
    .unwrap();
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "q").await.unwrap();

    assert_eq!(result.terminated_by, Termination::ModelFinished);
    assert_eq!(result.iteration_count, 2);
    let results = tool_results(&state);
    assert_eq!(results[0].0, "f1");
    assert!(results[0].1.starts_with("Error: Execution failed"));
    assert!(results[0].1.contains("faulty"));
    assert_eq!(results[1], ("c1".to_string(), "9".to_string()));
    // 第二次调用能看到失败的观察结果
    assert_eq!(gateway.calls()[1].conversation.len(), 4);
}

#[tokio::test]
async fn time_budget_expires_after_some_iterations() {
    let script = (0..10).map(|_| requests(vec![tool_call("calculator", json!({"expression": "1+1"}))]));
    let gateway = Arc::new(ScriptedGateway::new(script).with_delay(Duration::from_millis(100)));
    let orch = orchestrator(
        gateway.clone(),
        LoopConfig {
            time_budget: Some(Duration::from_millis(150)),
            ..LoopConfig::default()
        },
    );
    let mut state = ConversationState::new();

    let result = orch.run(&mut state, "keep going").await.unwrap();

    assert_eq!(result.terminated_by, Termination::TimedOut);
    assert!((1..=2).contains(&result.iteration_count));
    assert_eq!(gateway.call_count(), result.iteration_count);
    assert!(result.final_answer.contains("time budget of 0.15s"));
    assert!(state.pending_call_ids().is_empty());
}

#[tokio::test]
async fn gateway_failure_surfaces_as_error() {
    let gateway = Arc::new(ScriptedGateway::new(vec![requests(vec![tool_call(
        "calculator",
        json!({"expression": "1+1"}),
    )])]));
    let orch = orchestrator(gateway, LoopConfig::default());
    let mut state = ConversationState::new();

    let err = orch.run(&mut state, "q").await.unwrap_err();

    assert!(matches!(err, AgentError::Gateway(_)));
    assert!(state.pending_call_ids().is_empty());
}
