//! Configuration loading from capstan.toml.
//!
//! Precedence: built-in defaults, then the file, then environment variables.
//! The result is validated once and converted into runtime values; nothing
//! downstream reads the environment.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use runtime::{AgentConfig, DispatchPolicy, Endpoint, HttpTransportConfig, TransportConfig};
use serde::Deserialize;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_MODEL: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub log: LogConfig,
}

/// Which provider serves the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    #[default]
    Bedrock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// AWS region, Bedrock only.
    #[serde(default = "default_region")]
    pub region: String,

    /// Anthropic API key (sk-ant-api01-...).
    pub api_key: Option<String>,

    /// Bedrock API key, sent as a bearer token.
    pub token: Option<String>,

    pub system: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            region: default_region(),
            api_key: None,
            token: None,
            system: None,
        }
    }
}

/// How to reach the tool server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSection {
    Http {
        url: String,
        #[serde(default = "default_tool_timeout")]
        timeout_secs: u64,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_tool_timeout")]
        timeout_secs: u64,
    },
}

impl Default for TransportSection {
    fn default() -> Self {
        Self::Http {
            url: "http://localhost:8000".to_string(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Run the calls of one turn concurrently.
    #[serde(default = "default_true")]
    pub parallel_tools: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            parallel_tools: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `runtime=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

fn default_max_iterations() -> u32 {
    runtime::DEFAULT_MAX_ITERATIONS
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(model) = lookup("CAPSTAN_MODEL") {
            self.model.model = model;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.model.region = region;
        }
        if let Some(max_tokens) = lookup("MAX_TOKENS") {
            self.model.max_tokens = max_tokens.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("MAX_TOKENS is not a number: {max_tokens}"))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level.to_lowercase();
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(token) = lookup("AWS_BEARER_TOKEN_BEDROCK") {
            self.model.token = Some(token);
        }
        Ok(self)
    }

    /// Check everything that can be checked before connecting anywhere.
    ///
    /// Credentials are left to [`Config::endpoint`]: listing or calling tools
    /// needs none.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = &self.model;
        if model.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model.model is empty".into()));
        }
        if model.max_tokens == 0 {
            return Err(ConfigError::Invalid("model.max_tokens must be positive".into()));
        }
        if model.provider == Provider::Bedrock && model.region.trim().is_empty() {
            return Err(ConfigError::Invalid("model.region is empty".into()));
        }

        match &self.transport {
            TransportSection::Http { url, timeout_secs } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!(
                        "transport.url must be an http(s) URL: {url}"
                    )));
                }
                check_timeout(*timeout_secs)?;
            }
            TransportSection::Stdio {
                command,
                timeout_secs,
                ..
            } => {
                if command.trim().is_empty() {
                    return Err(ConfigError::Invalid("transport.command is empty".into()));
                }
                check_timeout(*timeout_secs)?;
            }
        }

        self.agent_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The model endpoint, with its credentials.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let model = &self.model;
        match model.provider {
            Provider::Anthropic => {
                let api_key = model.api_key.clone().ok_or(ConfigError::MissingCredential {
                    provider: "anthropic",
                    hint: "model.api_key or ANTHROPIC_API_KEY",
                })?;
                Ok(Endpoint::Anthropic { api_key })
            }
            Provider::Bedrock => {
                let token = model.token.clone().ok_or(ConfigError::MissingCredential {
                    provider: "bedrock",
                    hint: "model.token or AWS_BEARER_TOKEN_BEDROCK",
                })?;
                Ok(Endpoint::Bedrock {
                    region: model.region.clone(),
                    token,
                })
            }
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        match &self.transport {
            TransportSection::Http { url, timeout_secs } => TransportConfig::Http(
                HttpTransportConfig::new(url.clone()).timeout(Duration::from_secs(*timeout_secs)),
            ),
            TransportSection::Stdio {
                command,
                args,
                env,
                timeout_secs,
            } => {
                let mut config = mcp::ClientConfig::new("tools", command.clone())
                    .args(args.iter().cloned())
                    .timeout(Duration::from_secs(*timeout_secs));
                config.env = env.clone();
                TransportConfig::Stdio(config)
            }
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.agent.max_iterations,
            dispatch: if self.agent.parallel_tools {
                DispatchPolicy::Parallel
            } else {
                DispatchPolicy::Sequential
            },
        }
    }
}

fn check_timeout(secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(
            "transport.timeout_secs must be positive".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{provider} credentials not configured: set {hint}")]
    MissingCredential {
        provider: &'static str,
        hint: &'static str,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_from_empty_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.model.provider, Provider::Bedrock);
        assert_eq!(config.model.region, "us-east-1");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.agent_config(), AgentConfig::default());
        assert!(matches!(
            config.transport,
            TransportSection::Http { timeout_secs: 30, .. }
        ));
    }

    #[test]
    fn parses_full_file() {
        let config = Config::parse(
            r#"
            [model]
            provider = "anthropic"
            model = "claude-sonnet-4-20250514"
            max_tokens = 1024
            api_key = "sk-ant-test"
            system = "Be brief."

            [transport]
            kind = "stdio"
            command = "capstan-tools"
            args = ["stdio"]
            env = { RUST_LOG = "debug" }
            timeout_secs = 5

            [agent]
            max_iterations = 3
            parallel_tools = false

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(
            config.endpoint().unwrap(),
            Endpoint::Anthropic {
                api_key: "sk-ant-test".into()
            }
        );
        assert_eq!(config.agent_config().max_iterations, 3);
        assert_eq!(config.agent_config().dispatch, DispatchPolicy::Sequential);

        let TransportConfig::Stdio(client) = config.transport_config() else {
            panic!("expected stdio transport");
        };
        assert_eq!(client.command, "capstan-tools");
        assert_eq!(client.args, ["stdio"]);
        assert_eq!(client.env["RUST_LOG"], "debug");
        assert_eq!(client.timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = Config::parse("[model]\nmodle = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let config = Config::parse("[model]\nregion = \"eu-west-1\"\nmax_tokens = 10")
            .unwrap()
            .with_overrides(env(&[
                ("AWS_REGION", "us-west-2"),
                ("MAX_TOKENS", "2048"),
                ("LOG_LEVEL", "DEBUG"),
                ("AWS_BEARER_TOKEN_BEDROCK", "bedrock-token"),
            ]))
            .unwrap();

        assert_eq!(config.model.region, "us-west-2");
        assert_eq!(config.model.max_tokens, 2048);
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.endpoint().unwrap(),
            Endpoint::Bedrock {
                region: "us-west-2".into(),
                token: "bedrock-token".into()
            }
        );
    }

    #[test]
    fn bad_max_tokens_override() {
        let err = Config::default()
            .with_overrides(env(&[("MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_credentials() {
        let config = Config::parse("").unwrap();
        config.validate().unwrap();
        let err = config.endpoint().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                provider: "bedrock",
                ..
            }
        ));

        let err = Config::parse("[model]\nprovider = \"anthropic\"")
            .unwrap()
            .endpoint()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                provider: "anthropic",
                ..
            }
        ));
    }

    #[test]
    fn validation_failures() {
        for toml in [
            "[model]\nregion = \"\"",
            "[agent]\nmax_iterations = 0",
            "[transport]\nkind = \"http\"\nurl = \"localhost:8000\"",
            "[transport]\nkind = \"http\"\nurl = \"http://x\"\ntimeout_secs = 0",
            "[transport]\nkind = \"stdio\"\ncommand = \" \"",
        ] {
            let config = Config::parse(toml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{toml}"
            );
        }
    }

    #[test]
    fn http_transport_conversion() {
        let config = Config::parse(
            "[transport]\nkind = \"http\"\nurl = \"http://tools:9000\"\ntimeout_secs = 7",
        )
        .unwrap();
        let TransportConfig::Http(http) = config.transport_config() else {
            panic!("expected http transport");
        };
        assert_eq!(http.endpoint, "http://tools:9000");
        assert_eq!(http.timeout, Duration::from_secs(7));
    }
}
