//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry
//! 按注册顺序保存并按名查找；manifest() 的顺序即注册顺序，同一循环内保持稳定。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{RegistryError, ToolError};
use crate::tools::schema::{empty_parameters, validate_parameters, ToolDescriptor};

/// 工具 trait：名称（调度键）、描述（模型选择工具的唯一依据）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        empty_parameters()
    }

    /// 执行工具。可由模型修正的问题返回 InvalidArguments / Execution，而不是 panic
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// 工具注册表
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        validate_parameters(&tool.parameters_schema()).map_err(|reason| {
            RegistryError::InvalidSchema {
                tool: name.clone(),
                reason,
            }
        })?;
        tracing::debug!(tool = %name, "tool registered");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    /// 按注册顺序返回工具名
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 供模型网关使用的工具清单（注册顺序）
    pub fn manifest(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// 按名调度；未注册的工具返回 NotFound（由编排器转为 Observation）
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
            available: self.tool_names(),
        })?;
        tool.execute(args).await
    }
}
