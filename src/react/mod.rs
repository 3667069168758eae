//! 编排层：ReAct 主循环与过程事件

pub mod events;
pub mod loop_;

pub use events::ReactEvent;
pub use loop_::{LoopConfig, Orchestrator, RunContext, DEFAULT_MAX_ITERATIONS};
