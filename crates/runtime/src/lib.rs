//! Capstan runtime: the tool-use loop between a model and its tools.
//!
//! # Overview
//!
//! - **Agent**: runs one conversation. Each user message drives a loop of
//!   model calls and tool dispatches until the model answers without
//!   requesting tools, a budget runs out, or the caller cancels.
//! - **Backend**: a trait abstracting model providers (Anthropic, Bedrock).
//! - **ToolRegistry**: tool definitions advertised to the model, and the
//!   executors behind them.
//! - **ToolTransport**: reaches tools in another process, over HTTP or a
//!   stdio child speaking line-delimited JSON-RPC.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runtime::{
//!     Agent, AgentConfig, AnthropicBackend, Endpoint, HttpTransportConfig, ToolRegistry,
//!     TransportConfig, connect,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::Anthropic { api_key: "sk-ant-api01-...".into() };
//! let backend = AnthropicBackend::builder(endpoint, "claude-sonnet-4-20250514").build();
//!
//! let transport = connect(&TransportConfig::Http(HttpTransportConfig::new(
//!     "http://localhost:8000",
//! )))?;
//! let tools = ToolRegistry::from_transport(transport).await?;
//!
//! let mut agent = Agent::new(backend, Arc::new(tools), AgentConfig::default())?;
//! let answer = agent.chat("What is 2+2?").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

mod agent;
mod conversation;
mod error;
pub mod model;
pub mod providers;
pub mod tools;
pub mod transport;

pub use agent::{Agent, AgentConfig, DEFAULT_MAX_ITERATIONS, DispatchPolicy, LoopState};
pub use conversation::{Conversation, ConversationError, ConversationId, Turn};
pub use error::{Error, Result};
pub use model::{Backend, ModelError, ModelRequest, ModelResponse, ToolCall, Usage};
pub use providers::{AnthropicBackend, AnthropicBackendBuilder, Endpoint};
pub use tools::{
    Arguments, ParamType, ToolDefinition, ToolError, ToolExecutionResult, ToolExecutor,
    ToolRegistry,
};
pub use transport::{
    HttpTransport, HttpTransportConfig, RemoteTool, StdioTransport, ToolTransport,
    TransportConfig, connect,
};
