//! Line-delimited JSON-RPC tool protocol over stdio.
//!
//! Both ends live here: [`Client`] drives a tool server child process (one
//! request in flight at a time, correlated by strict ordering), and [`serve`]
//! answers requests for any [`Handler`].
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Client, ClientConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ClientConfig::new("tools", "capstan-tools").args(["stdio"]);
//!
//! let client = Client::spawn(config)?;
//! client.initialize().await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("calculate", Some(serde_json::json!({"expression": "2+2"})))
//!     .await?;
//! println!("{}", result.joined_text());
//!
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;
mod server;

pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, Tool, ToolContent, ToolsCapability,
};
pub use server::{Handler, serve};
