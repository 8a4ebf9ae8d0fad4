//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `call` was given arguments that are not a JSON object.
    #[error("arguments must be a JSON object: {0}")]
    InvalidArguments(String),

    /// A tool invoked with `call` ran and reported failure.
    #[error("tool failed: {0}")]
    ToolFailed(String),

    /// The logging filter could not be parsed.
    #[error("invalid log filter: {0}")]
    Logging(String),

    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    #[error(transparent)]
    Tool(#[from] runtime::ToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
