pub mod calculator;
pub mod executor;
pub mod registry;
pub mod retrieval;
pub mod schema;

pub use calculator::{CalculatorTool, CALCULATOR_TOOL_NAME};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use retrieval::{RetrievalSettings, RetrievalTool, RETRIEVAL_TOOL_NAME};
pub use schema::{parameters_for, parse_args, ToolDescriptor};
