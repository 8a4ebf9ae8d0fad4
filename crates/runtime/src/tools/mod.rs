//! Tool definitions, execution results, and the registry.

pub mod errors;
mod registry;
mod types;

pub use errors::ToolError;
pub use registry::{FnTool, ToolExecutor, ToolRegistry};
pub use types::{Arguments, ParamType, ToolDefinition, ToolExecutionResult};
