//! The HTTP face of the tool server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use runtime::{Arguments, ToolDefinition, ToolError, ToolRegistry};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::Result;

#[derive(Deserialize)]
struct CallRequest {
    tool: String,
    #[serde(default)]
    params: Arguments,
}

/// Routes: `GET /`, `GET /tools`, `POST /call`.
pub fn router(registry: Arc<ToolRegistry>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/tools", get(list_tools))
        .route("/call", post(call_tool))
        .with_state(registry)
}

/// Serve until ctrl-c.
pub async fn serve(registry: Arc<ToolRegistry>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, tools = registry.len(), "tool server listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn status() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

async fn list_tools(State(registry): State<Arc<ToolRegistry>>) -> Json<Vec<ToolDefinition>> {
    Json(registry.list().to_vec())
}

async fn call_tool(
    State(registry): State<Arc<ToolRegistry>>,
    Json(request): Json<CallRequest>,
) -> Response {
    match registry.execute(&request.tool, request.params).await {
        Ok(result) if result.is_error => error(StatusCode::OK, result.output_text()),
        Ok(result) => Json(json!({ "result": result.output })).into_response(),
        Err(e) => {
            warn!(tool = %request.tool, error = %e, "tool call failed");
            let status = match &e {
                ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
                ToolError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ToolError::Execution(message) => return error(StatusCode::OK, message.clone()),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error(status, e.to_string())
        }
    }
}

fn error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools;

    async fn start() -> String {
        let registry = Arc::new(tools::registry().unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(registry)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn call(base: &str, body: Value) -> (StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("{base}/call"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn root_reports_running() {
        let base = start().await;
        let body: Value = reqwest::get(format!("{base}/"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"status": "running"}));
    }

    #[tokio::test]
    async fn lists_tool_definitions() {
        let base = start().await;
        let tools: Vec<ToolDefinition> = reqwest::get(format!("{base}/tools"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["get_current_time", "calculate", "list_files"]);
    }

    #[tokio::test]
    async fn calculate_returns_result() {
        let base = start().await;
        let (status, body) = call(
            &base,
            json!({"tool": "calculate", "params": {"expression": "2+2"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": 4}));
    }

    #[tokio::test]
    async fn tool_failure_is_ok_with_error() {
        let base = start().await;
        let (status, body) = call(
            &base,
            json!({"tool": "calculate", "params": {"expression": "1/0"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"error": "division by zero"}));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let base = start().await;
        let (status, body) = call(&base, json!({"tool": "nope"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn missing_required_param_is_bad_request() {
        let base = start().await;
        let (status, body) = call(&base, json!({"tool": "calculate", "params": {}})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("expression"));
    }

    #[tokio::test]
    async fn http_transport_round_trip() {
        let base = start().await;
        let transport = runtime::HttpTransport::new(runtime::HttpTransportConfig::new(base)).unwrap();
        let registry = ToolRegistry::from_transport(Arc::new(transport)).await.unwrap();
        assert_eq!(registry.len(), 3);

        let mut args = Arguments::new();
        args.insert("expression".into(), json!("2 ** 8"));
        let result = registry.execute("calculate", args).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.output, json!(256));
    }
}
