//! Ways of reaching tools that live outside this process.

mod http;
mod stdio;

use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::{Arguments, ToolDefinition, ToolError, ToolExecutionResult, ToolExecutor};

pub use http::{HttpTransport, HttpTransportConfig};
pub use stdio::StdioTransport;

/// A connection to a tool server.
///
/// Every failure to reach the server (connection, process, decode, timeout)
/// is a [`ToolError::Transport`]; a tool that ran and failed comes back as a
/// result with `is_error` set.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Short label for logs, e.g. `"http"`.
    fn kind(&self) -> &'static str;

    /// Ask the server which tools it offers.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    /// Invoke one tool.
    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolExecutionResult, ToolError>;

    /// Release the connection. Idempotent.
    async fn shutdown(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

/// How to reach a tool server.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Http(HttpTransportConfig),
    Stdio(mcp::ClientConfig),
}

/// Open a transport. Stdio servers are spawned here and handshake lazily on
/// first use.
pub fn connect(config: &TransportConfig) -> Result<Arc<dyn ToolTransport>, ToolError> {
    Ok(match config {
        TransportConfig::Http(config) => Arc::new(HttpTransport::new(config.clone())?),
        TransportConfig::Stdio(config) => Arc::new(StdioTransport::spawn(config.clone())?),
    })
}

/// A registry entry that forwards to a transport.
pub struct RemoteTool {
    transport: Arc<dyn ToolTransport>,
    name: String,
}

impl RemoteTool {
    pub fn new(transport: Arc<dyn ToolTransport>, name: impl Into<String>) -> Self {
        Self {
            transport,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for RemoteTool {
    async fn execute(&self, arguments: Arguments) -> Result<ToolExecutionResult, ToolError> {
        self.transport.invoke(&self.name, arguments).await
    }
}
