//! Subprocess tool transport over line-delimited JSON-RPC.
//!
//! Also serves a [`ToolRegistry`] over the same protocol, which is how the
//! tool server binary exposes its tools.

use async_trait::async_trait;
use mcp::{CallToolParams, CallToolResult, Client, ClientConfig, Implementation, Tool};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::warn;

use super::ToolTransport;
use crate::tools::{Arguments, ToolDefinition, ToolError, ToolExecutionResult, ToolRegistry};

/// A long-lived tool server child process.
///
/// The handshake (`initialize`, then `tools/list`) runs once, on first use,
/// and no tool call goes out before it completes. The underlying client keeps
/// at most one request in flight, so concurrent calls queue behind each other.
pub struct StdioTransport {
    client: Client,
    tools: OnceCell<Vec<ToolDefinition>>,
}

impl StdioTransport {
    /// Spawn the server process. Nothing is sent until first use.
    pub fn spawn(config: ClientConfig) -> Result<Self, ToolError> {
        let client = Client::spawn(config).map_err(transport_error)?;
        Ok(Self::new(client))
    }

    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tools: OnceCell::new(),
        }
    }

    /// Complete the handshake if needed; yields the advertised tools.
    async fn ready(&self) -> Result<&[ToolDefinition], ToolError> {
        self.tools
            .get_or_try_init(|| async {
                self.client.initialize().await.map_err(handshake_error)?;
                let tools = self.client.list_tools().await.map_err(handshake_error)?;
                Ok(tools.into_iter().map(ToolDefinition::from).collect())
            })
            .await
            .map(Vec::as_slice)
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.ready().await?.to_vec())
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.ready().await?;
        let result = self
            .client
            .call_tool(name, Some(Value::Object(arguments)))
            .await
            .map_err(transport_error)?;

        let text = result.joined_text();
        if result.is_error {
            return Ok(ToolExecutionResult::failure(text));
        }
        let output = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ToolExecutionResult::success(output))
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        self.client.shutdown().await.map_err(transport_error)
    }
}

fn transport_error(e: mcp::Error) -> ToolError {
    ToolError::Transport(e.to_string())
}

/// A server that answers with something unusable is a handshake failure; one
/// that disappears or stalls is a transport failure.
fn handshake_error(e: mcp::Error) -> ToolError {
    match e {
        mcp::Error::InvalidResponse(_)
        | mcp::Error::UnsupportedVersion(_)
        | mcp::Error::JsonRpc(_)
        | mcp::Error::Serialize(_) => ToolError::Handshake(e.to_string()),
        other => transport_error(other),
    }
}

impl From<Tool> for ToolDefinition {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            parameters: tool.input_schema,
        }
    }
}

impl From<&ToolDefinition> for Tool {
    fn from(definition: &ToolDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            description: Some(definition.description.clone()),
            input_schema: definition.parameters.clone(),
        }
    }
}

impl mcp::Handler for ToolRegistry {
    fn server_info(&self) -> Implementation {
        Implementation {
            name: "capstan-tools".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    async fn list_tools(&self) -> Vec<Tool> {
        self.list().iter().map(Tool::from).collect()
    }

    async fn call_tool(&self, params: CallToolParams) -> CallToolResult {
        let arguments = match params.arguments {
            None | Some(Value::Null) => Arguments::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return CallToolResult::error(format!("arguments must be an object, got {other}"));
            }
        };

        match self.execute(&params.name, arguments).await {
            Ok(result) if result.is_error => CallToolResult::error(result.output_text()),
            Ok(result) => CallToolResult::text(result.output.to_string()),
            Err(e) => {
                warn!(tool = %params.name, error = %e, "tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamType;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex, split};

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("add", "Add two numbers")
                    .param("a", ParamType::Number, "First", true)
                    .param("b", ParamType::Number, "Second", true),
                |args| {
                    let a = args["a"].as_f64().unwrap_or_default();
                    let b = args["b"].as_f64().unwrap_or_default();
                    Ok(json!(a + b))
                },
            )
            .unwrap();
        registry
            .register_fn(ToolDefinition::new("fail", "Always fails"), |_| {
                Err(ToolError::Execution("boom".into()))
            })
            .unwrap();
        registry
    }

    /// A transport connected to an in-process server for `registry`.
    fn served(registry: ToolRegistry) -> StdioTransport {
        let (client_side, server_side) = duplex(64 * 1024);
        let (client_read, client_write) = split(client_side);
        let (server_read, server_write) = split(server_side);

        let registry = Arc::new(registry);
        tokio::spawn(async move { mcp::serve(&*registry, server_read, server_write).await });

        StdioTransport::new(Client::from_pipes(
            "test",
            client_write,
            client_read,
            Duration::from_secs(5),
        ))
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn lists_registry_tools() {
        let expected = registry();
        let transport = served(registry());

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools, expected.list());
    }

    #[tokio::test]
    async fn invoke_returns_structured_output() {
        let transport = served(registry());
        let result = transport
            .invoke("add", args(json!({"a": 2, "b": 2})))
            .await
            .unwrap();
        assert_eq!(result, ToolExecutionResult::success(json!(4.0)));
    }

    #[tokio::test]
    async fn tool_failure_is_error_result() {
        let transport = served(registry());

        let failed = transport.invoke("fail", Arguments::new()).await.unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.output_text(), "execution failed: boom");

        let unknown = transport.invoke("nope", Arguments::new()).await.unwrap();
        assert!(unknown.is_error);
        assert_eq!(unknown.output_text(), "unknown tool: nope");
    }

    #[tokio::test]
    async fn concurrent_invocations_are_serialized() {
        let transport = Arc::new(served(registry()));
        let calls = (0..8).map(|i| {
            let transport = Arc::clone(&transport);
            async move {
                transport
                    .invoke("add", args(json!({"a": i, "b": 1})))
                    .await
                    .unwrap()
            }
        });
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.output, json!(i as f64 + 1.0));
        }
    }

    #[tokio::test]
    async fn invoke_first_completes_handshake_with_tool_list() {
        let (client_side, server_side) = duplex(64 * 1024);
        let (client_read, client_write) = split(client_side);
        let (server_read, mut server_write) = split(server_side);

        // Answers whatever arrives and records the methods in order.
        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut methods = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                let request: Value = serde_json::from_str(&line).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let result = match method.as_str() {
                    "initialize" => json!({
                        "protocolVersion": mcp::PROTOCOL_VERSION,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "recorder"}
                    }),
                    "tools/list" => json!({"tools": [{"name": "add", "inputSchema": {"type": "object"}}]}),
                    "tools/call" => json!({"content": [{"type": "text", "text": "4"}]}),
                    _ => Value::Null,
                };
                let done = method == "tools/call";
                methods.push(method);
                if request.get("id").is_some() {
                    let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
                    server_write
                        .write_all(format!("{reply}\n").as_bytes())
                        .await
                        .unwrap();
                }
                if done {
                    break;
                }
            }
            methods
        });

        let transport = StdioTransport::new(Client::from_pipes(
            "recorder",
            client_write,
            client_read,
            Duration::from_secs(5),
        ));
        let result = transport.invoke("add", Arguments::new()).await.unwrap();
        assert_eq!(result.output, json!(4));

        let methods = server.await.unwrap();
        assert_eq!(
            methods,
            ["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );

        // The handshake's tool list is reused without another round trip.
        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "add");
    }

    #[tokio::test]
    async fn hangup_is_transport_error() {
        let (client_side, server_side) = duplex(1024);
        drop(server_side);
        let (read, write) = split(client_side);
        let transport =
            StdioTransport::new(Client::from_pipes("gone", write, read, Duration::from_secs(1)));

        let err = transport.invoke("add", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn garbage_handshake_is_fatal() {
        let (client_side, server_side) = duplex(1024);
        let (client_read, client_write) = split(client_side);
        let (server_read, mut server_write) = split(server_side);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let _ = lines.next_line().await;
            server_write.write_all(b"hello there\n").await.unwrap();
            // Hold the pipe open until the client has read the line.
            let _ = lines.next_line().await;
        });

        let transport = StdioTransport::new(Client::from_pipes(
            "garbage",
            client_write,
            client_read,
            Duration::from_secs(1),
        ));
        let err = transport.list_tools().await.unwrap_err();
        assert!(matches!(err, ToolError::Handshake(_)));
        assert!(err.is_fatal());

        drop(transport);
        server.await.unwrap();
    }
}
