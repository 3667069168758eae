//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时；execute 在超时内调度工具，工具 panic 被截获并降级为
//! Execution 错误；每次调用输出一行结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::schema::{preview, ToolDescriptor};
use crate::tools::ToolRegistry;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn manifest(&self) -> Vec<ToolDescriptor> {
        self.registry.manifest()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = preview(&args.to_string(), 200);
        let dispatch = AssertUnwindSafe(self.registry.dispatch(tool_name, args)).catch_unwind();

        let result = match timeout(self.timeout, dispatch).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_panic)) => Err(ToolError::Execution(format!(
                "tool '{tool_name}' crashed unexpectedly"
            ))),
            Err(_) => Err(ToolError::Timeout {
                tool: tool_name.to_string(),
                ms: self.timeout.as_millis() as u64,
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout { .. }) => "timeout",
            Err(ToolError::NotFound { .. }) => "not_found",
            Err(ToolError::InvalidArguments(_)) => "invalid_arguments",
            Err(ToolError::Execution(_)) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        result
    }
}
