//! Anthropic Messages API backend, served directly or through AWS Bedrock.

use std::time::Duration;

use crate::conversation::Turn;
use crate::model::{Backend, ModelError, ModelRequest, ModelResponse, ToolCall, Usage};
use crate::tools::ToolDefinition;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the Messages API is reached and how to authenticate there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// The Anthropic API, authenticated with an API key.
    Anthropic { api_key: String },
    /// Bedrock `invoke` in a region, authenticated with a bearer token.
    Bedrock { region: String, token: String },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic { .. } => write!(f, "anthropic"),
            Self::Bedrock { region, .. } => write!(f, "bedrock/{region}"),
        }
    }
}

impl Endpoint {
    fn default_base(&self) -> String {
        match self {
            Self::Anthropic { .. } => ANTHROPIC_API_BASE.to_string(),
            Self::Bedrock { region, .. } => {
                format!("https://bedrock-runtime.{region}.amazonaws.com")
            }
        }
    }

    fn url(&self, base: &str, model: &str) -> String {
        match self {
            Self::Anthropic { .. } => format!("{base}/v1/messages"),
            Self::Bedrock { .. } => format!("{base}/model/{model}/invoke"),
        }
    }

    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Anthropic { api_key } => req
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Self::Bedrock { token, .. } => req.bearer_auth(token),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    /// Bedrock takes the model from the URL instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_version: Option<&'static str>,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    endpoint: Endpoint,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    base_url: Option<String>,
    timeout: Duration,
}

impl AnthropicBackendBuilder {
    pub fn new(endpoint: Endpoint, model: impl Into<String>) -> Self {
        Self {
            endpoint,
            model: model.into(),
            max_tokens: 4096,
            system: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Send requests somewhere other than the endpoint's public host.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> AnthropicBackend {
        let base = self
            .base_url
            .unwrap_or_else(|| self.endpoint.default_base());
        let url = self
            .endpoint
            .url(base.trim_end_matches('/'), &self.model);
        AnthropicBackend {
            client: reqwest::Client::new(),
            url,
            endpoint: self.endpoint,
            model: self.model,
            max_tokens: self.max_tokens,
            system: self.system,
            timeout: self.timeout,
        }
    }
}

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    url: String,
    endpoint: Endpoint,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    timeout: Duration,
}

impl AnthropicBackend {
    pub fn builder(endpoint: Endpoint, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(endpoint, model)
    }

    /// Render turns as API messages, merging consecutive turns of the same
    /// role: a batch of tool results becomes one user message.
    fn turns_to_api(turns: &[Turn]) -> Vec<ApiMessage> {
        let mut messages: Vec<ApiMessage> = Vec::new();

        for turn in turns {
            let (role, blocks) = match turn {
                Turn::User { text } => ("user", vec![ApiContentBlock::Text { text: text.clone() }]),
                Turn::Assistant { text, tool_calls } => {
                    let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
                    if !text.is_empty() {
                        blocks.push(ApiContentBlock::Text { text: text.clone() });
                    }
                    blocks.extend(tool_calls.iter().map(|call| ApiContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: Value::Object(call.arguments.clone()),
                    }));
                    ("assistant", blocks)
                }
                Turn::ToolResult {
                    call_id,
                    output,
                    is_error,
                } => (
                    "user",
                    vec![ApiContentBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: match output {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                        is_error: *is_error,
                    }],
                ),
            };

            if blocks.is_empty() {
                continue;
            }
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => messages.push(ApiMessage {
                    role,
                    content: blocks,
                }),
            }
        }
        messages
    }

    fn tool_to_api(definition: &ToolDefinition) -> ApiTool<'_> {
        ApiTool {
            name: &definition.name,
            description: &definition.description,
            input_schema: &definition.parameters,
        }
    }

    fn response_from_api(api_response: ApiResponse) -> Result<ModelResponse, ModelError> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in api_response.content {
            match block {
                ApiResponseBlock::Text { text: t } => text.push_str(&t),
                ApiResponseBlock::ToolUse { id, name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        Value::Null => Default::default(),
                        other => {
                            return Err(ModelError::InvalidResponse(format!(
                                "tool_use {id} input is not an object: {other}"
                            )));
                        }
                    };
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
                ApiResponseBlock::Unknown => {}
            }
        }

        Ok(ModelResponse {
            text,
            tool_calls,
            usage: Usage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        })
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.endpoint, self.model)
    }
}

impl Backend for AnthropicBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let (model, anthropic_version) = match self.endpoint {
            Endpoint::Anthropic { .. } => (Some(self.model.as_str()), None),
            Endpoint::Bedrock { .. } => (None, Some(BEDROCK_ANTHROPIC_VERSION)),
        };

        let api_request = ApiRequest {
            model,
            anthropic_version,
            max_tokens: self.max_tokens,
            messages: Self::turns_to_api(request.turns),
            system: self.system.as_deref(),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
        };

        debug!(
            backend = %self,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "calling model"
        );

        let req = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("content-type", "application/json")
            .header("accept", "application/json");

        let response = self
            .endpoint
            .apply_headers(req)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        Self::response_from_api(api_response)
    }
}
