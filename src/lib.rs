//! Sage - Rust 工具增强推理智能体
//!
//! 模块划分：
//! - **agent**: 运行时装配（网关 + 工具 + 编排器）与带引用的问答入口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 分层错误类型、循环状态与结果
//! - **knowledge**: 知识索引边界（KnowledgeIndex）与内存关键词索引
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化）
//! - **memory**: 只追加的对话状态、会话持久化、分词
//! - **observability**: tracing 初始化
//! - **react**: ReAct 主循环（Orchestrator）与过程事件
//! - **synthesis**: 答案引用解析与来源附注
//! - **tools**: 工具契约、注册表、执行器，以及 calculator / search_report

pub mod agent;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod synthesis;
pub mod tools;

pub use crate::core::{AgentError, LoopResult, Termination};
pub use crate::react::{LoopConfig, Orchestrator, RunContext};
