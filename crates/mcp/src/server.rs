//! Server side of the stdio protocol: answer requests read line by line.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_INITIALIZE, METHOD_LIST_TOOLS, METHOD_PING, PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, Tool, ToolsCapability,
};

/// Tool provider answered by [`serve`].
pub trait Handler: Send + Sync {
    /// Name and version reported during the handshake.
    fn server_info(&self) -> Implementation;

    /// Tools offered by this server.
    fn list_tools(&self) -> impl Future<Output = Vec<Tool>> + Send;

    /// Run one tool. Failures are reported in-band via `is_error`.
    fn call_tool(&self, params: CallToolParams) -> impl Future<Output = CallToolResult> + Send;
}

/// Answer requests from `reader` on `writer` until the input closes.
///
/// Requests are handled strictly in arrival order, one at a time.
pub async fn serve<H, R, W>(handler: &H, reader: R, mut writer: W) -> Result<()>
where
    H: Handler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(response) = handle_line(handler, line).await else {
            continue;
        };

        let encoded = serde_json::to_string(&response)?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    info!("input closed, stopping");
    Ok(())
}

async fn handle_line<H: Handler>(handler: &H, line: &str) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return Some(JsonRpcResponse::failure(
                None,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("parse error: {e}")),
            ));
        }
    };

    if request.is_notification() {
        debug!(method = %request.method, "notification");
        return None;
    }

    debug!(method = %request.method, id = ?request.id, "request");
    let id = request.id.clone();
    Some(match dispatch(handler, request).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

async fn dispatch<H: Handler>(
    handler: &H,
    request: JsonRpcRequest,
) -> std::result::Result<Value, JsonRpcError> {
    match request.method.as_str() {
        METHOD_INITIALIZE => {
            let params: InitializeParams = parse_params(request.params)?;
            // Echo the client's version when we speak it, else offer ours.
            let protocol_version =
                if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                    params.protocol_version
                } else {
                    PROTOCOL_VERSION.to_string()
                };
            encode(InitializeResult {
                protocol_version,
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability::default()),
                },
                server_info: handler.server_info(),
            })
        }
        METHOD_PING => Ok(json!({})),
        METHOD_LIST_TOOLS => encode(ListToolsResult {
            tools: handler.list_tools().await,
        }),
        METHOD_CALL_TOOL => {
            let params: CallToolParams = parse_params(request.params)?;
            encode(handler.call_tool(params).await)
        }
        other => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        JsonRpcError::new(JsonRpcError::INVALID_PARAMS, format!("invalid params: {e}"))
    })
}

fn encode(value: impl Serialize) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}
