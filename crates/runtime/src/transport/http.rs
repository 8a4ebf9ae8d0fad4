//! HTTP tool transport: `GET /tools`, `POST /call`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::ToolTransport;
use crate::tools::{Arguments, ToolDefinition, ToolError, ToolExecutionResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the tool server lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL, e.g. `http://localhost:8000`.
    pub endpoint: String,
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stateless HTTP transport. Each call is an independent request.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct CallRequest<'a> {
    tool: &'a str,
    params: &'a Arguments,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let response = self
            .client
            .get(self.url("/tools"))
            .send()
            .await
            .map_err(request_failed)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ToolError::Transport(format!("malformed tool list: {e}")))
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolExecutionResult, ToolError> {
        debug!(tool = name, "POST /call");
        let response = self
            .client
            .post(self.url("/call"))
            .json(&CallRequest {
                tool: name,
                params: &arguments,
            })
            .send()
            .await
            .map_err(request_failed)?;
        let response = check_status(response).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Transport(format!("malformed response: {e}")))?;

        if let Some(error) = body.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(ToolExecutionResult::failure(message));
        }
        match body {
            Value::Object(mut map) if map.contains_key("result") => Ok(
                ToolExecutionResult::success(map.remove("result").unwrap_or(Value::Null)),
            ),
            other => Err(ToolError::Transport(format!(
                "response has neither result nor error: {other}"
            ))),
        }
    }
}

fn request_failed(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Transport(format!("request timed out: {e}"))
    } else {
        ToolError::Transport(e.to_string())
    }
}

/// Pass 2xx through; turn anything else into a transport error carrying the
/// server's `{error}` message when it sent one.
async fn check_status(response: Response) -> Result<Response, ToolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(ToolError::Transport(format!("{status}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn list() -> Json<Value> {
        Json(json!([{
            "name": "calculate",
            "description": "Evaluate arithmetic",
            "parameters": {"type": "object", "properties": {}}
        }]))
    }

    async fn call(Json(body): Json<Value>) -> Response {
        match body["tool"].as_str().unwrap_or_default() {
            "echo" => Json(json!({"result": body})).into_response(),
            "fails" => Json(json!({"error": "division by zero"})).into_response(),
            "garbage" => "not json".into_response(),
            "shapeless" => Json(json!({"answer": 42})).into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"result": 1})).into_response()
            }
            _ => (StatusCode::NOT_FOUND, Json(json!({"error": "Unknown tool"}))).into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/tools", get(list))
            .route("/call", post(call));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    async fn transport() -> HttpTransport {
        HttpTransport::new(HttpTransportConfig::new(serve().await)).unwrap()
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn lists_tools() {
        let tools = transport().await.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "calculate");
    }

    #[tokio::test]
    async fn invoke_sends_tool_and_params() {
        let result = transport()
            .await
            .invoke("echo", args(json!({"expression": "2+2"})))
            .await
            .unwrap();
        assert_eq!(
            result,
            ToolExecutionResult::success(json!({"tool": "echo", "params": {"expression": "2+2"}}))
        );
    }

    #[tokio::test]
    async fn error_body_is_failed_result() {
        let result = transport()
            .await
            .invoke("fails", Arguments::new())
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.output_text(), "division by zero");
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let err = transport()
            .await
            .invoke("nope", Arguments::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ToolError::Transport(m) if m.contains("404") && m.contains("Unknown tool"))
        );
    }

    #[tokio::test]
    async fn malformed_body_is_transport_error() {
        let transport = transport().await;
        for tool in ["garbage", "shapeless"] {
            let err = transport.invoke(tool, Arguments::new()).await.unwrap_err();
            assert!(matches!(err, ToolError::Transport(_)), "{tool}");
        }
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let config = HttpTransportConfig::new(serve().await).timeout(Duration::from_millis(100));
        let err = HttpTransport::new(config)
            .unwrap()
            .invoke("slow", Arguments::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = HttpTransportConfig::new(format!("http://127.0.0.1:{port}"));
        let err = HttpTransport::new(config)
            .unwrap()
            .list_tools()
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
    }
}
