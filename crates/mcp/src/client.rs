//! Client side of the stdio protocol (spawn, handshake, request/response).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_LIST_TOOLS, RequestId, SUPPORTED_PROTOCOL_VERSIONS, Tool,
};

/// Default timeout for one request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of a single response line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How to launch a tool server process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Partial lines stay buffered inside the codec, so a read abandoned by a
/// timeout resumes where it stopped on the next request.
type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LinesCodec>;

/// Both ends of the pipe, locked together: a request and its response are a
/// single critical section, so at most one request is ever in flight.
struct Channel {
    writer: Writer,
    reader: Reader,
    next_id: i64,
}

impl Channel {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(Error::from_pipe)?;
        self.writer.write_all(b"\n").await.map_err(Error::from_pipe)?;
        self.writer.flush().await.map_err(Error::from_pipe)
    }

    async fn read_response(&mut self, id: i64) -> Result<JsonRpcResponse> {
        loop {
            let line = match self.reader.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(Error::OutputTooLarge {
                        max: MAX_OUTPUT_SIZE,
                    });
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(Error::from_pipe(e)),
                None => return Err(Error::ServerExited),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(line)
                .map_err(|e| Error::InvalidResponse(format!("malformed line: {e}")))?;

            // Server-initiated notifications and requests are not answers.
            if value.get("method").is_some() {
                debug!(line, "ignoring server-initiated message");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| Error::InvalidResponse(format!("not a JSON-RPC response: {e}")))?;

            match &response.id {
                Some(RequestId::Number(n)) if *n == id => return Ok(response),
                // A late answer to a request that already timed out.
                Some(RequestId::Number(n)) if *n < id => {
                    warn!(stale = n, expected = id, "discarding stale response");
                }
                None if response.error.is_some() => return Ok(response),
                other => {
                    return Err(Error::InvalidResponse(format!(
                        "response ID mismatch: expected {id}, got {other:?}"
                    )));
                }
            }
        }
    }
}

/// Handle to a tool server speaking line-delimited JSON-RPC.
///
/// Usually owns a child process; [`Client::from_pipes`] connects to any
/// reader/writer pair instead.
pub struct Client {
    name: String,
    timeout: Duration,
    process: Option<Mutex<Child>>,
    channel: Mutex<Channel>,
    handshake: OnceLock<InitializeResult>,
}

impl Client {
    /// Spawn a tool server process.
    pub fn spawn(config: ClientConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        info!(server = %config.name, command = %config.command, "spawned tool server");

        let mut client = Self::from_pipes(config.name, stdin, stdout, config.timeout);
        client.process = Some(Mutex::new(process));
        Ok(client)
    }

    /// Connect to a server over an existing pipe pair.
    pub fn from_pipes(
        name: impl Into<String>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
        timeout: Duration,
    ) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            name: name.into(),
            timeout,
            process: None,
            channel: Mutex::new(Channel {
                writer: Box::new(writer),
                reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_OUTPUT_SIZE)),
                next_id: 1,
            }),
            handshake: OnceLock::new(),
        }
    }

    /// Perform the `initialize` handshake (required before other operations).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if let Some(result) = self.handshake.get() {
            return Ok(result.clone());
        }

        let result: InitializeResult = self
            .request(METHOD_INITIALIZE, Some(InitializeParams::default()))
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(Error::UnsupportedVersion(result.protocol_version));
        }

        self.notify(METHOD_INITIALIZED).await?;

        info!(
            server = %self.name,
            peer = %result.server_info.name,
            version = %result.protocol_version,
            "handshake complete"
        );
        let _ = self.handshake.set(result.clone());
        Ok(result)
    }

    /// Check if the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.handshake.get().is_some()
    }

    /// List the tools the server offers.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;
        let result: ListToolsResult = self.request(METHOD_LIST_TOOLS, None::<()>).await?;
        Ok(result.tools)
    }

    /// Call a tool by name.
    ///
    /// A result with `is_error` set is returned as-is; only protocol and
    /// process failures are errors here.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request(METHOD_CALL_TOOL, Some(params)).await
    }

    /// Close the pipe and terminate the server process.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut channel = self.channel.lock().await;
            let _ = channel.writer.shutdown().await;
        }

        if let Some(process) = &self.process {
            let mut process = process.lock().await;
            if let Err(e) = process.kill().await {
                debug!(server = %self.name, "kill failed (already exited?): {e}");
            }
        }
        info!(server = %self.name, "tool server shut down");
        Ok(())
    }

    // --- Internal methods ---

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let response = {
            let mut channel = self.channel.lock().await;
            // Ids increase in send order, so any lower id read back is stale.
            let id = channel.next_id;
            channel.next_id += 1;

            let mut request = JsonRpcRequest::new(id, method);
            if let Some(p) = params {
                request = request.with_params(p)?;
            }
            let line = serde_json::to_string(&request)?;

            debug!(server = %self.name, method, id, "-> request");
            timeout(self.timeout, async {
                channel.write_line(&line).await?;
                channel.read_response(id).await
            })
            .await
            .map_err(|_| Error::Timeout(self.timeout))??
        };
        debug!(server = %self.name, method, "<- response");

        let result = response.into_result()?;
        Ok(serde_json::from_value(result)?)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method))?;
        let mut channel = self.channel.lock().await;
        timeout(self.timeout, channel.write_line(&line))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    /// The server end of an in-memory pipe, driven by hand.
    struct Peer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn recv(&mut self) -> Value {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, message: Value) {
            let line = format!("{message}\n");
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn reply(&mut self, request: &Value, result: Value) {
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
                .await;
        }

        async fn accept_handshake(&mut self) {
            let init = self.recv().await;
            assert_eq!(init["method"], METHOD_INITIALIZE);
            self.reply(
                &init,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake"}
                }),
            )
            .await;
            let note = self.recv().await;
            assert_eq!(note["method"], METHOD_INITIALIZED);
            assert!(note.get("id").is_none());
        }
    }

    fn connect(timeout: Duration) -> (Client, Peer) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);
        let client = Client::from_pipes("fake", our_write, our_read, timeout);
        let peer = Peer {
            reader: BufReader::new(their_read),
            writer: their_write,
        };
        (client, peer)
    }

    fn echo_result(request: &Value) -> Value {
        json!({"content": [{"type": "text", "text": request["params"]["name"]}]})
    }

    #[tokio::test]
    async fn call_before_initialize_fails() {
        let (client, _peer) = connect(DEFAULT_TIMEOUT);
        let err = client.call_tool("anything", None).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn handshake_then_call() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;

            let list = peer.recv().await;
            assert_eq!(list["method"], METHOD_LIST_TOOLS);
            peer.reply(
                &list,
                json!({"tools": [{"name": "calculate", "inputSchema": {"type": "object"}}]}),
            )
            .await;

            let call = peer.recv().await;
            assert_eq!(call["method"], METHOD_CALL_TOOL);
            assert_eq!(call["params"]["arguments"]["expression"], "2+2");
            peer.reply(&call, json!({"content": [{"type": "text", "text": "4"}]}))
                .await;
            peer
        });

        let info = client.initialize().await.unwrap();
        assert_eq!(info.server_info.name, "fake");
        assert!(client.is_initialized());

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "calculate");

        let result = client
            .call_tool("calculate", Some(json!({"expression": "2+2"})))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.joined_text(), "4");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unsupported_protocol_version() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            let init = peer.recv().await;
            peer.reply(
                &init,
                json!({"protocolVersion": "1999-01-01", "serverInfo": {"name": "old"}}),
            )
            .await;
            peer
        });

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(v) if v == "1999-01-01"));
        assert!(!client.is_initialized());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn second_request_waits_for_first_response() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;

            let first = peer.recv().await;
            // While the first call is unanswered nothing else may arrive.
            let mut early_line = String::new();
            let early = tokio::time::timeout(
                Duration::from_millis(100),
                peer.reader.read_line(&mut early_line),
            )
            .await;
            assert!(early.is_err(), "second request written early: {early_line}");
            peer.reply(&first, echo_result(&first)).await;

            let second = peer.recv().await;
            peer.reply(&second, echo_result(&second)).await;
            peer
        });

        client.initialize().await.unwrap();
        let (a, b) = tokio::join!(client.call_tool("a", None), client.call_tool("b", None));
        assert_eq!(a.unwrap().joined_text(), "a");
        assert_eq!(b.unwrap().joined_text(), "b");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn skips_notifications_and_stale_responses() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;
            let call = peer.recv().await;
            peer.send(json!({"jsonrpc": "2.0", "method": "notifications/message"}))
                .await;
            peer.send(json!({"jsonrpc": "2.0", "id": 0, "result": {}}))
                .await;
            peer.reply(&call, echo_result(&call)).await;
            peer
        });

        client.initialize().await.unwrap();
        let result = client.call_tool("echo", None).await.unwrap();
        assert_eq!(result.joined_text(), "echo");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_response_is_invalid() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;
            let _call = peer.recv().await;
            peer.writer.write_all(b"this is not json\n").await.unwrap();
            peer
        });

        client.initialize().await.unwrap();
        let err = client.call_tool("x", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn hangup_is_server_exited() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let _call = peer.recv().await;
            drop(peer);
        });

        client.initialize().await.unwrap();
        let err = client.call_tool("x", None).await.unwrap_err();
        assert!(matches!(err, Error::ServerExited));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, mut peer) = connect(Duration::from_millis(100));
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;
            let _call = peer.recv().await;
            peer
        });

        client.initialize().await.unwrap();
        let err = client.call_tool("x", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // Keep the peer alive until the client has given up.
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn reply_split_across_timeout_is_not_lost() {
        let (client, mut peer) = connect(Duration::from_millis(200));
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;

            let first = peer.recv().await;
            let line = format!(
                "{}\n",
                json!({"jsonrpc": "2.0", "id": first["id"], "result": echo_result(&first)})
            );
            let (head, tail) = line.as_bytes().split_at(10);
            peer.writer.write_all(head).await.unwrap();
            peer.writer.flush().await.unwrap();

            // The second request only arrives after the first has timed out.
            let second = peer.recv().await;
            peer.writer.write_all(tail).await.unwrap();
            peer.reply(&second, echo_result(&second)).await;
            peer
        });

        client.initialize().await.unwrap();
        let first = client.call_tool("first", None).await.unwrap_err();
        assert!(matches!(first, Error::Timeout(_)));

        // The late tail completes the stale reply, which is then skipped.
        let second = client.call_tool("second", None).await.unwrap();
        assert_eq!(second.joined_text(), "second");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unterminated_huge_line_is_rejected() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let _call = peer.recv().await;
            let chunk = vec![b'x'; 64 * 1024];
            // Never a newline; stops once the client stops reading.
            loop {
                if peer.writer.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        client.initialize().await.unwrap();
        let err = client.call_tool("x", None).await.unwrap_err();
        assert!(matches!(err, Error::OutputTooLarge { max } if max == MAX_OUTPUT_SIZE));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ids_follow_send_order() {
        let (client, mut peer) = connect(DEFAULT_TIMEOUT);
        let server = tokio::spawn(async move {
            peer.accept_handshake().await;
            let mut ids = Vec::new();
            for _ in 0..8 {
                let call = peer.recv().await;
                ids.push(call["id"].as_i64().unwrap());
                peer.reply(&call, echo_result(&call)).await;
            }
            ids
        });

        client.initialize().await.unwrap();
        let client = std::sync::Arc::new(client);
        let calls: Vec<_> = (0..8)
            .map(|i| {
                let client = std::sync::Arc::clone(&client);
                tokio::spawn(async move { client.call_tool(&format!("t{i}"), None).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        let ids = server.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_exiting_before_reply() {
        let config = ClientConfig::new("short-lived", "sh").args(["-c", "exit 0"]);
        let client = Client::spawn(config).unwrap();
        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, Error::ServerExited));
    }

    #[test]
    fn config_builder() {
        let config = ClientConfig::new("tools", "capstan-tools")
            .args(["stdio"])
            .timeout(Duration::from_secs(3));
        assert_eq!(config.args, vec!["stdio".to_string()]);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.env.is_empty());
    }
}
