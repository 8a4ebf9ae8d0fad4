use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from registering, resolving, or running a tool.
///
/// Every variant except [`ToolError::Handshake`] is recoverable inside the
/// agent loop: it becomes an error-tagged tool result the model can react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// Arguments do not match the tool's declared parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tool ran but signaled failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Network or process failure, malformed payload, or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The tool server answered the protocol handshake with something we
    /// cannot use.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ToolError {
    /// Whether the agent loop must stop instead of reporting this to the model.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }
}
